use std::sync::Arc;

use axum::extract::FromRef;
use lingo_core::Lingo;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub lingo: Arc<Lingo>,
}
