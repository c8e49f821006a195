mod repository;
mod schema;

pub use repository::{ArticleRepository, RepositoryOptions};
