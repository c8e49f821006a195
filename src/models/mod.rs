mod analysis;
mod article;

pub use analysis::{
    ArticleParagraphs, NewAnalysis, Paragraph, Topic, TopicRating,
};
pub use article::{Article, ArticleListing, NewArticle};
