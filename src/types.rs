use std::sync::{Arc, RwLock};

use crate::error::RailError;

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub type RailResult = Result<(), RailError>;
