//! API request handlers

mod budget;
mod health;
mod invoices;
mod members;
mod workspaces;

pub use budget::*;
pub use health::*;
pub use invoices::*;
pub use members::*;
pub use workspaces::*;

use coffer_core::QueryWindow;
use serde::Deserialize;

/// `limit`/`offset` query parameters. A missing or zero limit means everything.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl From<PageParams> for QueryWindow {
    fn from(params: PageParams) -> Self {
        QueryWindow::page(params.limit, params.offset)
    }
}
