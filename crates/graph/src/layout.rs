//! The contract between graph builders and whatever positions the nodes.
//!
//! Layout itself happens elsewhere; this module only fixes the shapes that
//! come back and checks that they cover the graph that went in.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::FlowGraph;

/// Space added around the laid out graph so strokes on the border are not
/// clipped.
pub const DEFAULT_PADDING: f64 = 10.0;

#[derive(Debug, thiserror::Error)]
pub enum LayoutContractError {
    #[error("edge {label:?} has {count} points, need at least 3")]
    TooFewPoints { label: String, count: usize },
    #[error("layout has no geometry for node {0:?}")]
    MissingNode(String),
    #[error("layout has no geometry for edge {0:?}")]
    MissingEdge(String),
    #[error("invalid layout canvas: width={width} height={height}")]
    InvalidCanvas { width: f64, height: f64 },
}

pub trait LayoutEngine {
    fn layout(&self, graph: &FlowGraph) -> Result<Layout, LayoutContractError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A positioned node. `x`/`y` is the centre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGeometry {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NodeGeometry {
    pub fn top_left(&self) -> Point {
        Point { x: self.x - self.width / 2.0, y: self.y - self.height / 2.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeGeometry {
    pub label: String,
    pub v: String,
    pub w: String,
    pub points: Vec<Point>,
}

impl EdgeGeometry {
    /// Start, bend and end of the drawn polyline.
    pub fn path(&self) -> Result<(Point, Point, Point), LayoutContractError> {
        match self.points.as_slice() {
            [start, corner, end, ..] => Ok((*start, *corner, *end)),
            other => Err(LayoutContractError::TooFewPoints { label: self.label.clone(), count: other.len() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub width: f64,
    pub height: f64,
    pub nodes: Vec<NodeGeometry>,
    pub edges: Vec<EdgeGeometry>,
}

impl Layout {
    /// Canvas size with `padding` on every side.
    pub fn canvas(&self, padding: f64) -> Result<(f64, f64), LayoutContractError> {
        if !self.width.is_finite() || !self.height.is_finite() || self.width < 0.0 || self.height < 0.0 {
            return Err(LayoutContractError::InvalidCanvas { width: self.width, height: self.height });
        }
        Ok((self.width + 2.0 * padding, self.height + 2.0 * padding))
    }

    /// Every node and edge of `graph` has geometry, and every edge can be
    /// drawn.
    pub fn validate(&self, graph: &FlowGraph) -> Result<(), LayoutContractError> {
        self.canvas(DEFAULT_PADDING)?;
        let nodes: FxHashSet<&str> = self.nodes.iter().map(|n| n.label.as_str()).collect();
        if let Some(missing) = graph.nodes.iter().find(|n| !nodes.contains(n.label.as_str())) {
            return Err(LayoutContractError::MissingNode(missing.label.clone()));
        }
        for edge in &graph.edges {
            let geometry = self
                .edges
                .iter()
                .find(|g| g.label == edge.label)
                .ok_or_else(|| LayoutContractError::MissingEdge(edge.label.clone()))?;
            geometry.path()?;
        }
        Ok(())
    }
}
