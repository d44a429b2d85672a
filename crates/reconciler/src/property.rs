//! Per-path reconciliation of a live projection against a desired one.

use std::fmt;

use serde_json::Value;
use tether_core::{semantic_eq, PathError, PathExpr};
use tracing::debug;

/// Presence of a path in desired (bit 1) and live (bit 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    MissingInBoth = 0,
    MissingFromDesiredPresentInLive = 1,
    PresentInDesiredMissingFromLive = 2,
    PresentInBoth = 3,
}

impl Delta {
    pub fn classify(desired_present: bool, live_present: bool) -> Self {
        match ((desired_present as u8) << 1) | live_present as u8 {
            0 => Delta::MissingInBoth,
            1 => Delta::MissingFromDesiredPresentInLive,
            2 => Delta::PresentInDesiredMissingFromLive,
            _ => Delta::PresentInBoth,
        }
    }
}

/// Change applied to the live projection for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Replace,
    Delete,
}

/// An ensure or ignore path expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Property(String);

impl Property {
    pub fn new(path: impl Into<String>) -> Self { Self(path.into()) }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn expr(&self) -> Result<PathExpr, PathError> { PathExpr::parse(&self.0) }

    /// Enforce the desired value at this path onto `live`, mirroring the live value
    /// into `normalized` first. `desired` is never written.
    pub fn reconcile(&self, live: &mut Value, desired: &Value, normalized: &mut Value) -> Result<Option<PatchOp>, PathError> {
        let expr = self.expr()?;
        let desired_val = single(&expr, desired)?;
        let live_val = single(&expr, live)?;

        if let Some(v) = &live_val {
            expr.set(normalized, v)?;
        }

        let op = match Delta::classify(desired_val.is_some(), live_val.is_some()) {
            Delta::MissingInBoth => None,
            Delta::MissingFromDesiredPresentInLive => {
                expr.delete(live);
                Some(PatchOp::Delete)
            }
            Delta::PresentInDesiredMissingFromLive => {
                if let Some(d) = &desired_val {
                    expr.set(live, d)?;
                }
                Some(PatchOp::Add)
            }
            Delta::PresentInBoth => match (&desired_val, &live_val) {
                (Some(d), Some(l)) if !semantic_eq(d, l) => {
                    expr.set(live, d)?;
                    Some(PatchOp::Replace)
                }
                _ => None,
            },
        };
        if let Some(op) = op {
            debug!(path = %self, op = ?op, "differences detected");
        }
        Ok(op)
    }

    /// Copy the value at this path in `src` into `dst`; false when `src` has none.
    pub fn capture(&self, src: &Value, dst: &mut Value) -> Result<bool, PathError> {
        let expr = self.expr()?;
        match single(&expr, src)? {
            Some(v) => {
                expr.set(dst, &v)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove this path from `tree`; unresolved paths are a no-op.
    pub fn ignore(&self, tree: &mut Value) -> Result<usize, PathError> {
        Ok(self.expr()?.delete(tree))
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for Property {
    fn from(s: &str) -> Self { Self::new(s) }
}

impl From<String> for Property {
    fn from(s: String) -> Self { Self(s) }
}

// A null match is treated like a missing one.
fn single(expr: &PathExpr, tree: &Value) -> Result<Option<Value>, PathError> {
    let found = expr.get(tree);
    if found.len() > 1 {
        return Err(PathError::MultiValued(expr.as_str().to_string()));
    }
    Ok(found.into_iter().next().filter(|v| !v.is_null()).cloned())
}
