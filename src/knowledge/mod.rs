//! Route knowledge: what documentation pages exist and how to describe them
//! to the model.

mod index;
pub mod scan;

pub use index::{
    DEFAULT_INIT_MESSAGE, RouteCategory, RouteIndex, RouteInfo, ScanSource, categorize,
    category_name, route_knowledge,
};
pub use scan::scan_directory;
