//! The analysis context: explicit session state for one or more runs.
//!
//! Holds what an interactive host would keep globally: the active image
//! slot, images published by collaborators under their titles, and named
//! result tables. Every stage receives the context explicitly, and the
//! orchestrator re-reads the active image after anything that may have
//! replaced it.

use std::collections::BTreeMap;

use crate::results::ResultTable;
use crate::types::{Hyperstack, PipelineError};

/// Session state shared by the stages of a run.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    active: Option<Hyperstack>,
    images: BTreeMap<String, Hyperstack>,
    tables: BTreeMap<String, ResultTable>,
}

impl AnalysisContext {
    /// An empty context with no active image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose active image is `image`.
    #[must_use]
    pub fn with_image(image: Hyperstack) -> Self {
        Self {
            active: Some(image),
            ..Self::default()
        }
    }

    /// The active image, if any.
    #[must_use]
    pub const fn active(&self) -> Option<&Hyperstack> {
        self.active.as_ref()
    }

    /// The active image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoActiveImage`] if the slot is empty.
    pub fn require_active(&self) -> Result<&Hyperstack, PipelineError> {
        self.active.as_ref().ok_or(PipelineError::NoActiveImage)
    }

    /// Mutable access to the active image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoActiveImage`] if the slot is empty.
    pub fn require_active_mut(&mut self) -> Result<&mut Hyperstack, PipelineError> {
        self.active.as_mut().ok_or(PipelineError::NoActiveImage)
    }

    /// Replace the active image, returning the previous one.
    pub fn set_active(&mut self, image: Hyperstack) -> Option<Hyperstack> {
        self.active.replace(image)
    }

    /// Empty the active image slot.
    pub const fn take_active(&mut self) -> Option<Hyperstack> {
        self.active.take()
    }

    /// Publish an image under its title, replacing any image with the
    /// same title.
    pub fn publish(&mut self, image: Hyperstack) {
        self.images.insert(image.title().to_owned(), image);
    }

    /// A published image by title.
    #[must_use]
    pub fn image(&self, title: &str) -> Option<&Hyperstack> {
        self.images.get(title)
    }

    /// Remove and return a published image.
    pub fn take_image(&mut self, title: &str) -> Option<Hyperstack> {
        self.images.remove(title)
    }

    /// Titles of all published images.
    pub fn image_titles(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }

    /// A result table by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&ResultTable> {
        self.tables.get(name)
    }

    /// The table named `name`, created empty if this session has none.
    pub fn table_mut(&mut self, name: &str) -> &mut ResultTable {
        self.tables
            .entry(name.to_owned())
            .or_insert_with(|| ResultTable::new(name))
    }

    /// Remove and return a table.
    pub fn take_table(&mut self, name: &str) -> Option<ResultTable> {
        self.tables.remove(name)
    }
}
