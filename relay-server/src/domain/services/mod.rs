pub mod diff;
pub mod reconciler;
