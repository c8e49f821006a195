use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub id: i64,
    pub ordinal: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRating {
    pub topic_id: i64,
    pub topic: String,
    pub relevant: bool,
}

/// Fully assembled analysis view of one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleParagraphs {
    pub article_id: i64,
    pub title: String,
    pub paragraphs: Vec<Paragraph>,
    pub topics: Vec<Topic>,
    pub topics_map: BTreeMap<i64, String>,
    /// Keyed by paragraph id.
    pub paragraph_ratings: BTreeMap<i64, Vec<TopicRating>>,
    pub summary: Option<String>,
    /// Keyed by paragraph id.
    pub summary_rating: BTreeMap<i64, f64>,
}

impl ArticleParagraphs {
    pub fn ratings_for(&self, paragraph_id: i64) -> &[TopicRating] {
        self.paragraph_ratings
            .get(&paragraph_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Output of the external analysis pass, written in one go by
/// `ArticleRepository::set_paragraphs`.
///
/// `summary_ratings[i]` and `topic_ratings[i]` belong to `paragraphs[i]`;
/// `topic_ratings[i][j]` rates `paragraphs[i]` against `topics[j]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAnalysis {
    pub paragraphs: Vec<String>,
    pub summary: String,
    pub summary_ratings: Vec<f64>,
    pub topics: Vec<String>,
    pub topic_ratings: Vec<Vec<bool>>,
}

impl NewAnalysis {
    pub fn validate(&self) -> Result<()> {
        let paragraphs = self.paragraphs.len();
        if self.summary_ratings.len() != paragraphs {
            return Err(AppError::InvalidAnalysis(format!(
                "{} summary ratings for {} paragraphs",
                self.summary_ratings.len(),
                paragraphs
            )));
        }
        if self.topic_ratings.len() != paragraphs {
            return Err(AppError::InvalidAnalysis(format!(
                "{} topic rating rows for {} paragraphs",
                self.topic_ratings.len(),
                paragraphs
            )));
        }
        if let Some((i, row)) = self
            .topic_ratings
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.topics.len())
        {
            return Err(AppError::InvalidAnalysis(format!(
                "paragraph {} has {} topic ratings, expected {}",
                i,
                row.len(),
                self.topics.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis() -> NewAnalysis {
        NewAnalysis {
            paragraphs: vec!["one".into(), "two".into()],
            summary: "short".into(),
            summary_ratings: vec![90.0, 10.0],
            topics: vec!["economy".into()],
            topic_ratings: vec![vec![true], vec![false]],
        }
    }

    #[test]
    fn consistent_shapes_pass() {
        assert!(analysis().validate().is_ok());
    }

    #[test]
    fn missing_summary_rating_is_rejected() {
        let mut a = analysis();
        a.summary_ratings.pop();
        assert!(matches!(a.validate(), Err(AppError::InvalidAnalysis(_))));
    }

    #[test]
    fn ragged_topic_rows_are_rejected() {
        let mut a = analysis();
        a.topic_ratings[1].push(true);
        let err = a.validate().unwrap_err().to_string();
        assert!(err.contains("paragraph 1"), "{err}");
    }
}
