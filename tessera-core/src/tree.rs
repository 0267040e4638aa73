//! Ordered integer trees and their flat encoding.
//!
//! A tree is stored as the sequence of its root's descendants in pre-order,
//! with a descend marker before each non-empty child group and an ascend
//! marker after it. The root value itself is not stored.
//!
//! ```text
//! root
//!   1
//!   2
//!     3
//!     4
//!   5            =>   1, 2, DESC, 3, 4, ASC, 5
//! ```

use crate::CodecError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Int64Node {
    pub value: i64,
    pub children: Vec<Int64Node>,
}

impl Int64Node {
    pub fn new(value: i64) -> Self {
        Self {
            value,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: Int64Node) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes below this one.
    pub fn descendants(&self) -> usize {
        self.children.iter().map(|c| 1 + c.descendants()).sum()
    }

    /// Pre-order values of every descendant, without markers.
    pub fn values(&self) -> Vec<i64> {
        let mut out = Vec::with_capacity(self.descendants());
        self.collect_values(&mut out);
        out
    }

    fn collect_values(&self, out: &mut Vec<i64>) {
        for child in &self.children {
            out.push(child.value);
            child.collect_values(out);
        }
    }
}

/// Marker pair used to linearize a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeCodec {
    pub descend: i64,
    pub ascend: i64,
}

impl Default for TreeCodec {
    fn default() -> Self {
        Self {
            descend: -2,
            ascend: -1,
        }
    }
}

impl TreeCodec {
    fn is_marker(&self, value: i64) -> bool {
        value == self.descend || value == self.ascend
    }

    /// Flatten the children of `root`. Node values equal to a marker are rejected.
    pub fn encode_children(&self, root: &Int64Node) -> Result<Vec<i64>, CodecError> {
        let mut out = Vec::with_capacity(root.descendants() + 2);
        self.encode_into(root, &mut out)?;
        Ok(out)
    }

    fn encode_into(&self, node: &Int64Node, out: &mut Vec<i64>) -> Result<(), CodecError> {
        for child in &node.children {
            if self.is_marker(child.value) {
                return Err(CodecError::ReservedTreeValue { value: child.value });
            }
            out.push(child.value);
            if !child.children.is_empty() {
                out.push(self.descend);
                self.encode_into(child, out)?;
                out.push(self.ascend);
            }
        }
        Ok(())
    }

    /// Rebuild a tree from its flat form. The returned root has value 0.
    ///
    /// A descend immediately followed by an ascend is an empty group and is
    /// skipped.
    pub fn decode_children(&self, values: &[i64]) -> Result<Int64Node, CodecError> {
        // Open nodes from the root down. A node moves onto the stack when the
        // first value after its descend marker arrives.
        let mut stack: Vec<Int64Node> = vec![Int64Node::default()];
        let mut pending_descend = false;

        for (position, &value) in values.iter().enumerate() {
            let malformed = |reason: &str| CodecError::MalformedTree {
                position,
                reason: reason.to_string(),
            };
            if value == self.descend {
                let has_node = stack.last().is_some_and(|top| !top.children.is_empty());
                if pending_descend || !has_node {
                    return Err(malformed("descend without a preceding node"));
                }
                pending_descend = true;
            } else if value == self.ascend {
                if pending_descend {
                    pending_descend = false;
                    continue;
                }
                if stack.len() < 2 {
                    return Err(malformed("ascend above the root"));
                }
                let closed = stack.pop().ok_or_else(|| malformed("ascend above the root"))?;
                if let Some(top) = stack.last_mut() {
                    top.children.push(closed);
                }
            } else {
                if pending_descend {
                    let parent = stack
                        .last_mut()
                        .and_then(|top| top.children.pop())
                        .ok_or_else(|| malformed("descend without a preceding node"))?;
                    stack.push(parent);
                    pending_descend = false;
                }
                if let Some(top) = stack.last_mut() {
                    top.children.push(Int64Node::new(value));
                }
            }
        }

        if pending_descend || stack.len() != 1 {
            return Err(CodecError::MalformedTree {
                position: values.len(),
                reason: "unterminated descend".to_string(),
            });
        }
        stack.pop().ok_or(CodecError::MalformedTree {
            position: values.len(),
            reason: "empty stack".to_string(),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
