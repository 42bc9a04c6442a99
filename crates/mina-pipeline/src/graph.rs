//! Skeleton graph model and skeleton analysis.
//!
//! A skeleton decomposes into disjoint [`NetworkGraph`]s, one per
//! connected component. Vertices are end points and junctions; edges are
//! the branches between them, carrying their calibrated length.
//!
//! The [`SkeletonAnalyzer`] trait is the collaborator seam. Its result
//! carries a per-graph branch count that is authoritative on its own: an
//! analyzer may prune or merge branches without keeping the edge list
//! in step, so consumers must not recount edges.
//!
//! # Built-in analyzer
//!
//! [`VoxelGraphAnalyzer`] classifies each skeleton voxel by how many
//! skeleton neighbours it has (8-connected within a plane, 26-connected
//! across planes):
//!
//! | neighbours | class    |
//! |------------|----------|
//! | 0          | isolated |
//! | 1          | end point|
//! | 2          | slab     |
//! | 3+         | junction |
//!
//! Touching junction voxels merge into one vertex. Branches are traced
//! from every vertex through slab voxels to the next vertex. A component
//! without any vertex (a closed ring) gets one at its first voxel and a
//! single looping branch. An isolated voxel is a graph with no branches.

use std::collections::HashSet;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};

use crate::skeletonize::Skeleton;
use crate::stats::Summary;
use crate::types::{Calibration, PipelineError};

/// A skeleton voxel position: `[x, y, plane]`.
pub type Voxel = [u32; 3];

/// An end point or a merged junction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vertex {
    /// Voxels forming the vertex.
    pub voxels: Vec<Voxel>,
}

/// One branch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Edge {
    /// Calibrated length from vertex voxel to vertex voxel.
    pub length: f64,
    /// Slab voxels along the branch, in order.
    pub slabs: Vec<Voxel>,
}

/// One connected skeleton component.
#[derive(Debug, Clone, Default)]
pub struct NetworkGraph {
    graph: UnGraph<Vertex, Edge>,
}

impl NetworkGraph {
    /// Wrap an existing graph.
    #[must_use]
    pub const fn from_graph(graph: UnGraph<Vertex, Edge>) -> Self {
        Self { graph }
    }

    /// The underlying graph.
    #[must_use]
    pub const fn graph(&self) -> &UnGraph<Vertex, Edge> {
        &self.graph
    }

    /// Add a vertex.
    pub fn add_vertex(&mut self, vertex: Vertex) -> NodeIndex {
        self.graph.add_node(vertex)
    }

    /// Add a branch between two vertices (equal for a loop).
    pub fn add_edge(&mut self, a: NodeIndex, b: NodeIndex, edge: Edge) {
        self.graph.add_edge(a, b, edge);
    }

    /// All branches.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// Number of branches in the edge list.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Sum of all branch lengths.
    #[must_use]
    pub fn total_length(&self) -> f64 {
        self.edges().map(|e| e.length).sum()
    }
}

/// Every network of one skeleton plus the analyzer's branch counts.
#[derive(Debug, Clone, Default)]
pub struct SkeletonAnalysis {
    graphs: Vec<NetworkGraph>,
    branches: Vec<usize>,
}

impl SkeletonAnalysis {
    /// Bundle graphs with their branch counts.
    #[must_use]
    pub const fn new(graphs: Vec<NetworkGraph>, branches: Vec<usize>) -> Self {
        Self { graphs, branches }
    }

    /// The networks.
    #[must_use]
    pub fn graphs(&self) -> &[NetworkGraph] {
        &self.graphs
    }

    /// Reported branch count per network.
    #[must_use]
    pub fn branches(&self) -> &[usize] {
        &self.branches
    }
}

/// Decomposes a skeleton into network graphs.
pub trait SkeletonAnalyzer {
    /// Analyze `skeleton`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if the skeleton is
    /// malformed, or an analyzer-specific failure.
    fn analyze(&self, skeleton: &Skeleton) -> Result<SkeletonAnalysis, PipelineError>;
}

/// The three series summarized for every run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatistics {
    /// Individual branch lengths over all networks.
    pub branch_length: Summary,
    /// Total branch length per network.
    pub summed_branch_length: Summary,
    /// Reported branch count per network.
    pub network_branches: Summary,
}

impl NetworkStatistics {
    /// Reduce an analysis to its summaries.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingCollaboratorOutput`] naming the
    /// series that turned out empty (no branches or no networks).
    pub fn from_analysis(analysis: &SkeletonAnalysis) -> Result<Self, PipelineError> {
        let branch_lengths: Vec<f64> = analysis
            .graphs()
            .iter()
            .flat_map(|g| g.edges().map(|e| e.length))
            .collect();
        let summed: Vec<f64> = analysis
            .graphs()
            .iter()
            .map(NetworkGraph::total_length)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let branches: Vec<f64> = analysis.branches().iter().map(|&b| b as f64).collect();

        let summarize = |xs: &[f64], what: &str| {
            Summary::of(xs).map_err(|_| {
                PipelineError::MissingCollaboratorOutput(format!("skeleton analysis found no {what}"))
            })
        };
        Ok(Self {
            branch_length: summarize(&branch_lengths, "branches")?,
            summed_branch_length: summarize(&summed, "networks")?,
            network_branches: summarize(&branches, "branch counts")?,
        })
    }
}

/// Built-in neighbour-count analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoxelGraphAnalyzer;

impl SkeletonAnalyzer for VoxelGraphAnalyzer {
    fn analyze(&self, skeleton: &Skeleton) -> Result<SkeletonAnalysis, PipelineError> {
        let grid = VoxelGrid::new(skeleton)?;
        Ok(grid.decompose())
    }
}

const NONE: usize = usize::MAX;

/// Foreground voxels with a dense position lookup.
struct VoxelGrid<'a> {
    width: usize,
    height: usize,
    depth: usize,
    calibration: &'a Calibration,
    /// Position index to voxel id, or [`NONE`].
    ids: Vec<usize>,
    /// Voxel id to position, in raster order.
    voxels: Vec<Voxel>,
}

impl<'a> VoxelGrid<'a> {
    fn new(skeleton: &'a Skeleton) -> Result<Self, PipelineError> {
        let (w, h) = skeleton.dimensions();
        if skeleton.planes().iter().any(|p| p.dimensions() != (w, h)) {
            return Err(PipelineError::InvalidImage(
                "skeleton planes must have the same width and height".to_owned(),
            ));
        }
        let (width, height, depth) = (w as usize, h as usize, skeleton.planes().len());
        let mut ids = vec![NONE; width * height * depth];
        let mut voxels = Vec::new();
        for (z, plane) in (0u32..).zip(skeleton.planes()) {
            for (x, y, p) in plane.enumerate_pixels() {
                if p.0[0] != 0 {
                    let at = (z as usize * height + y as usize) * width + x as usize;
                    ids[at] = voxels.len();
                    voxels.push([x, y, z]);
                }
            }
        }
        Ok(Self {
            width,
            height,
            depth,
            calibration: skeleton.calibration(),
            ids,
            voxels,
        })
    }

    fn neighbours(&self, id: usize) -> Vec<usize> {
        let [x, y, z] = self.voxels[id];
        let (x, y, z) = (x as usize, y as usize, z as usize);
        let mut out = Vec::with_capacity(8);
        for nz in z.saturating_sub(1)..=(z + 1).min(self.depth - 1) {
            for ny in y.saturating_sub(1)..=(y + 1).min(self.height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(self.width - 1) {
                    if (nx, ny, nz) == (x, y, z) {
                        continue;
                    }
                    let n = self.ids[(nz * self.height + ny) * self.width + nx];
                    if n != NONE {
                        out.push(n);
                    }
                }
            }
        }
        out
    }

    fn distance(&self, a: usize, b: usize) -> f64 {
        let [ax, ay, az] = self.voxels[a];
        let [bx, by, bz] = self.voxels[b];
        let dx = f64::from(ax.abs_diff(bx)) * self.calibration.pixel_width;
        let dy = f64::from(ay.abs_diff(by)) * self.calibration.pixel_height;
        let dz = f64::from(az.abs_diff(bz)) * self.calibration.pixel_depth;
        dz.mul_add(dz, dx.mul_add(dx, dy * dy)).sqrt()
    }

    fn decompose(&self) -> SkeletonAnalysis {
        let n = self.voxels.len();
        let adjacency: Vec<Vec<usize>> = (0..n).map(|id| self.neighbours(id)).collect();

        // Components over all voxels; junction clusters over junctions only.
        let mut components = UnionFind::<usize>::new(n);
        let mut clusters = UnionFind::<usize>::new(n);
        for (id, ns) in adjacency.iter().enumerate() {
            for &m in ns {
                components.union(id, m);
                if ns.len() > 2 && adjacency[m].len() > 2 {
                    clusters.union(id, m);
                }
            }
        }

        // Component roots in order of first voxel.
        let mut component_of = vec![NONE; n];
        let mut graphs: Vec<NetworkGraph> = Vec::new();
        for id in 0..n {
            let root = components.find_mut(id);
            if component_of[root] == NONE {
                component_of[root] = graphs.len();
                graphs.push(NetworkGraph::default());
            }
            component_of[id] = component_of[root];
        }

        // Vertices: every non-slab voxel, junction clusters merged.
        let mut vertex_of: Vec<Option<NodeIndex>> = vec![None; n];
        for id in 0..n {
            if adjacency[id].len() == 2 {
                continue;
            }
            let root = clusters.find_mut(id);
            let node = if let Some(node) = vertex_of[root] {
                node
            } else {
                let node = graphs[component_of[id]].add_vertex(Vertex::default());
                vertex_of[root] = Some(node);
                node
            };
            vertex_of[id] = Some(node);
            if let Some(v) = graphs[component_of[id]].graph.node_weight_mut(node) {
                v.voxels.push(self.voxels[id]);
            }
        }

        // Rings have no vertex: open one at their first voxel.
        let mut has_vertex = vec![false; graphs.len()];
        for id in 0..n {
            has_vertex[component_of[id]] |= vertex_of[id].is_some();
        }
        for id in 0..n {
            let g = component_of[id];
            if !has_vertex[g] {
                let node = graphs[g].add_vertex(Vertex {
                    voxels: vec![self.voxels[id]],
                });
                vertex_of[id] = Some(node);
                has_vertex[g] = true;
            }
        }

        let mut visited = vec![false; n];
        let mut direct: HashSet<(usize, usize)> = HashSet::new();
        for start in 0..n {
            let Some(from) = vertex_of[start] else {
                continue;
            };
            let g = component_of[start];
            for &first in &adjacency[start] {
                match vertex_of[first] {
                    Some(to) if to == from => {}
                    Some(to) => {
                        if direct.insert((start.min(first), start.max(first))) {
                            graphs[g].add_edge(
                                from,
                                to,
                                Edge {
                                    length: self.distance(start, first),
                                    slabs: Vec::new(),
                                },
                            );
                        }
                    }
                    None if visited[first] => {}
                    None => {
                        if let Some((to, edge)) =
                            self.trace(start, first, &adjacency, &vertex_of, &mut visited)
                        {
                            graphs[g].add_edge(from, to, edge);
                        } else {
                            log::debug!("unterminated branch at {:?}", self.voxels[first]);
                        }
                    }
                }
            }
        }

        let branches = graphs.iter().map(NetworkGraph::edge_count).collect();
        SkeletonAnalysis::new(graphs, branches)
    }

    /// Follow slabs from vertex voxel `start` through `first` to the next
    /// vertex voxel.
    fn trace(
        &self,
        start: usize,
        first: usize,
        adjacency: &[Vec<usize>],
        vertex_of: &[Option<NodeIndex>],
        visited: &mut [bool],
    ) -> Option<(NodeIndex, Edge)> {
        let mut edge = Edge::default();
        let (mut prev, mut cur) = (start, first);
        edge.length += self.distance(prev, cur);
        loop {
            visited[cur] = true;
            edge.slabs.push(self.voxels[cur]);
            let next = adjacency[cur]
                .iter()
                .copied()
                .filter(|&m| m != prev)
                .find(|&m| vertex_of[m].is_some() || !visited[m])?;
            edge.length += self.distance(cur, next);
            if let Some(to) = vertex_of[next] {
                return Some((to, edge));
            }
            (prev, cur) = (cur, next);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{FOREGROUND, GrayImage};

    fn skeleton(w: u32, h: u32, on: &[(u32, u32)], calibration: Calibration) -> Skeleton {
        let mut plane = GrayImage::new(w, h);
        for &(x, y) in on {
            plane.put_pixel(x, y, image::Luma([FOREGROUND]));
        }
        Skeleton::new(vec![plane], calibration)
    }

    fn analyze(s: &Skeleton) -> SkeletonAnalysis {
        VoxelGraphAnalyzer.analyze(s).unwrap()
    }

    #[test]
    fn straight_line_is_one_branch() {
        let line: Vec<_> = (2..=12).map(|x| (x, 3)).collect();
        let a = analyze(&skeleton(16, 6, &line, Calibration::default()));
        assert_eq!(a.graphs().len(), 1);
        assert_eq!(a.branches(), &[1]);
        let edge = a.graphs()[0].edges().next().unwrap();
        assert!((edge.length - 10.0).abs() < 1e-12);
        assert_eq!(edge.slabs.len(), 9);
    }

    #[test]
    fn length_uses_calibration() {
        let line: Vec<_> = (0..5).map(|x| (x, 0)).collect();
        let calibration = Calibration {
            pixel_width: 0.5,
            ..Calibration::default()
        };
        let a = analyze(&skeleton(5, 1, &line, calibration));
        assert!((a.graphs()[0].total_length() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn diagonal_steps_are_root_two() {
        let line: Vec<_> = (0..4).map(|i| (i, i)).collect();
        let a = analyze(&skeleton(4, 4, &line, Calibration::default()));
        let expected = 3.0 * 2.0_f64.sqrt();
        assert!((a.graphs()[0].total_length() - expected).abs() < 1e-12);
    }

    #[test]
    fn t_junction_has_three_branches() {
        // Horizontal bar from x=0..=10 at y=5, vertical stem x=5 from y=6..=10.
        let mut on: Vec<_> = (0..=10).map(|x| (x, 5)).collect();
        on.extend((6..=10).map(|y| (5, y)));
        let a = analyze(&skeleton(11, 11, &on, Calibration::default()));
        assert_eq!(a.graphs().len(), 1);
        let g = &a.graphs()[0];
        assert_eq!(a.branches(), &[3]);
        assert_eq!(g.vertex_count(), 4);
        // The four voxels around the crossing merge into one junction, so
        // each branch is measured from the edge of that cluster.
        assert!((g.total_length() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn separate_components_are_separate_graphs() {
        let mut on: Vec<_> = (0..5).map(|x| (x, 0)).collect();
        on.extend((0..3).map(|x| (x, 4)));
        let a = analyze(&skeleton(8, 5, &on, Calibration::default()));
        assert_eq!(a.graphs().len(), 2);
        assert_eq!(a.branches(), &[1, 1]);
    }

    #[test]
    fn ring_is_one_looping_branch() {
        // Diamond of 8 voxels, each touching exactly two others.
        let on = [
            (2, 0),
            (3, 1),
            (4, 2),
            (3, 3),
            (2, 4),
            (1, 3),
            (0, 2),
            (1, 1),
        ];
        let a = analyze(&skeleton(5, 5, &on, Calibration::default()));
        assert_eq!(a.graphs().len(), 1);
        assert_eq!(a.branches(), &[1]);
        let expected = 8.0 * 2.0_f64.sqrt();
        assert!((a.graphs()[0].total_length() - expected).abs() < 1e-12);
    }

    #[test]
    fn isolated_voxel_has_no_branches() {
        let a = analyze(&skeleton(3, 3, &[(1, 1)], Calibration::default()));
        assert_eq!(a.graphs().len(), 1);
        assert_eq!(a.branches(), &[0]);
        assert_eq!(a.graphs()[0].vertex_count(), 1);
    }

    #[test]
    fn two_voxels_are_one_direct_branch() {
        let a = analyze(&skeleton(3, 1, &[(0, 0), (1, 0)], Calibration::default()));
        assert_eq!(a.branches(), &[1]);
        assert!(a.graphs()[0].edges().next().unwrap().slabs.is_empty());
    }

    #[test]
    fn lines_connect_across_planes() {
        let mut lower = GrayImage::new(4, 1);
        let mut upper = GrayImage::new(4, 1);
        lower.put_pixel(0, 0, image::Luma([FOREGROUND]));
        lower.put_pixel(1, 0, image::Luma([FOREGROUND]));
        upper.put_pixel(2, 0, image::Luma([FOREGROUND]));
        upper.put_pixel(3, 0, image::Luma([FOREGROUND]));
        let calibration = Calibration {
            pixel_depth: 2.0,
            ..Calibration::default()
        };
        let s = Skeleton::new(vec![lower, upper], calibration);
        let a = analyze(&s);
        assert_eq!(a.graphs().len(), 1);
        assert_eq!(a.branches(), &[1]);
        let expected = 2.0 + 5.0_f64.sqrt();
        assert!((a.graphs()[0].total_length() - expected).abs() < 1e-12);
    }

    #[test]
    fn statistics_of_empty_analysis_are_missing_output() {
        let a = analyze(&skeleton(3, 3, &[], Calibration::default()));
        assert!(matches!(
            NetworkStatistics::from_analysis(&a),
            Err(PipelineError::MissingCollaboratorOutput(_))
        ));
    }

    #[test]
    fn statistics_use_reported_branch_counts() {
        let line: Vec<_> = (0..=4).map(|x| (x, 0)).collect();
        let a = analyze(&skeleton(5, 1, &line, Calibration::default()));
        let graphs = a.graphs().to_vec();
        // An analyzer that reports pruned counts independent of the edges.
        let reported = SkeletonAnalysis::new(graphs, vec![7]);
        let stats = NetworkStatistics::from_analysis(&reported).unwrap();
        assert!((stats.network_branches.mean - 7.0).abs() < 1e-12);
        assert!((stats.branch_length.mean - 4.0).abs() < 1e-12);
    }
}
