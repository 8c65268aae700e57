//! Static site generation from the article store.
//!
//! # Submodules
//!
//! - [`json`]: Writes the article list as `articles.json` for API-style consumers
//! - [`site`]: Renders `index.html` with one card per article
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── index.html      # cards + embedded article data
//! └── articles.json   # same data, standalone
//! ```

pub mod json;
pub mod site;
