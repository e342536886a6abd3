//! Pipeline orchestration: the fixed stage sequences behind each task kind,
//! and the collaborator contracts those stages call.
//!
//! Collaborators are injected trait objects; the orchestrator owns stage
//! ordering, data threading, and failure attribution. Each stage is
//! all-or-nothing: a failing stage aborts the chain and earlier stages'
//! side effects are left in place.

pub mod context;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, StageError};
use crate::task::{TaskKind, TaskPayload};

/// One external-collaborator step within a pipeline's fixed sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  DiscoverTrends,
  SelectTopic,
  FetchSources,
  GenerateContent,
  OptimizeSeo,
  GenerateImages,
  Publish,
  ScheduleReview,
}

impl Stage {
  pub fn as_str(&self) -> &'static str {
    match self {
      Stage::DiscoverTrends => "discover_trends",
      Stage::SelectTopic => "select_topic",
      Stage::FetchSources => "fetch_sources",
      Stage::GenerateContent => "generate_content",
      Stage::OptimizeSeo => "optimize_seo",
      Stage::GenerateImages => "generate_images",
      Stage::Publish => "publish",
      Stage::ScheduleReview => "schedule_review",
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A collaborator-side failure: network, malformed response, validation.
/// The orchestrator attributes it to the stage that made the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
  pub fn new(message: impl Into<String>) -> Self {
    Self(message.into())
  }
}

impl fmt::Display for CollaboratorError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl std::error::Error for CollaboratorError {}

/// The future type collaborator methods return.
pub type CollabFuture<'a, T> = BoxFuture<'a, Result<T, CollaboratorError>>;

// --- Stage data types ---

/// A trending topic discovered by the trend source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
  pub id: String,
  pub topic: String,
  pub description: String,
  /// 1-10; higher is more relevant.
  pub relevance_score: u32,
  pub source_url: String,
}

/// A researched source handed to content generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
  pub kind: String,
  pub title: String,
  pub author: String,
  pub url: String,
  pub credibility_score: u32,
  pub relevance_score: u32,
}

/// Trend context threaded into generation for automated runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendingContext {
  pub topics: Vec<String>,
  pub search_queries: Vec<String>,
  pub scraped_urls: Vec<String>,
}

/// Everything the content generator needs for one piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRequest {
  pub topic: String,
  pub trending: Option<TrendingContext>,
  pub sources: Vec<SourceRef>,
  pub instructions: Option<String>,
}

/// Output of the content generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
  pub id: String,
  pub title: String,
  pub slug: String,
  pub body: String,
  pub summary: String,
  pub meta_description: String,
  pub keywords: Vec<String>,
  pub word_count: usize,
  pub reading_time_minutes: usize,
}

/// Input to SEO optimization, projected from generated content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoInput {
  pub title: String,
  pub content: String,
  pub meta_description: String,
  pub keywords: Vec<String>,
  pub slug: String,
}

/// Result of SEO optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoReport {
  pub meta_description: String,
  pub keywords: Vec<String>,
  pub seo_title: String,
  pub score: u32,
  pub recommendations: Vec<String>,
  pub schema: serde_json::Value,
  pub slug_suggestions: Vec<String>,
}

/// Outcome of a publish call. `success = false` with a message covers the
/// idempotent already-published case as well as rejections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
  pub success: bool,
  pub post_id: Option<String>,
  pub url: Option<String>,
  pub message: String,
}

// --- Collaborator contracts ---

/// Discovers trending topics and researches sources for a chosen topic.
pub trait TrendSource: Send + Sync {
  /// Scrapes every configured source, persisting discoveries on the
  /// collaborator side. Keyed by source name.
  fn discover_trends(&self) -> CollabFuture<'_, BTreeMap<String, Vec<Trend>>>;
  /// The top unused trends, ordered by relevance descending.
  fn top_trends(&self, limit: usize) -> CollabFuture<'_, Vec<Trend>>;
  /// Marks trends as consumed so later runs do not reselect them.
  fn mark_used(&self, ids: Vec<String>) -> CollabFuture<'_, ()>;
  /// Researches credible sources for a topic.
  fn search_sources(&self, topic: String) -> CollabFuture<'_, Vec<SourceRef>>;
}

/// Generates one piece of content. Fails on malformed model output.
pub trait ContentGenerator: Send + Sync {
  fn create_content(&self, request: ContentRequest) -> CollabFuture<'_, GeneratedContent>;
}

/// Scores and improves content metadata.
pub trait SeoOptimizer: Send + Sync {
  fn optimize(&self, input: SeoInput) -> CollabFuture<'_, SeoReport>;
}

/// Renders thumbnail and banner images, returning their paths.
pub trait ImageGenerator: Send + Sync {
  fn thumbnail(&self, title: String, subtitle: String) -> CollabFuture<'_, PathBuf>;
  fn banner(&self, title: String, category: String) -> CollabFuture<'_, PathBuf>;
}

/// Pushes finished content to the publishing endpoint. Idempotent on an
/// already-published item (returns `success = false` with a message, never a
/// duplicate publish).
pub trait Publisher: Send + Sync {
  fn publish(&self, content_id: String) -> CollabFuture<'_, PublishReceipt>;
}

/// The bundle of collaborator handles a pipeline executes against.
#[derive(Clone)]
pub struct Collaborators {
  pub trend_source: Arc<dyn TrendSource>,
  pub content_generator: Arc<dyn ContentGenerator>,
  pub seo_optimizer: Arc<dyn SeoOptimizer>,
  pub image_generator: Arc<dyn ImageGenerator>,
  pub publisher: Arc<dyn Publisher>,
}

impl fmt::Debug for Collaborators {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Collaborators { .. }")
  }
}

// --- Orchestrator ---

/// Executes the fixed stage sequence for a task kind, threading each stage's
/// output into the next and recording which stages completed.
#[derive(Debug, Clone)]
pub struct Pipeline {
  collaborators: Collaborators,
  config: PipelineConfig,
}

impl Pipeline {
  pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Self {
    Self {
      collaborators,
      config,
    }
  }

  /// Runs the pipeline for `kind`, returning the structured result payload
  /// or the failing stage together with the completed-stage trace.
  pub async fn run(
    &self,
    kind: TaskKind,
    parameters: &TaskPayload,
  ) -> Result<TaskPayload, PipelineError> {
    match kind {
      TaskKind::Scrape => self.run_scrape().await,
      TaskKind::GenerateAndPublish => self.run_generate_and_publish().await,
      TaskKind::CustomBlog | TaskKind::GenerateCustom => self.run_custom(parameters).await,
    }
  }

  async fn run_scrape(&self) -> Result<TaskPayload, PipelineError> {
    let mut trace = Vec::new();
    let trends = step(
      &mut trace,
      Stage::DiscoverTrends,
      self.collaborators.trend_source.discover_trends(),
    )
    .await?;

    let found: usize = trends.values().map(Vec::len).sum();
    info!(trends_found = found, "Trend discovery completed.");

    let mut result = TaskPayload::new();
    result.insert("trends_found".into(), found.into());
    result.insert(
      "sources".into(),
      trends.keys().cloned().collect::<Vec<_>>().into(),
    );
    Ok(result)
  }

  async fn run_generate_and_publish(&self) -> Result<TaskPayload, PipelineError> {
    let mut trace = Vec::new();
    let collab = &self.collaborators;

    // Selection also consumes the chosen trends so a later run cannot pick
    // them again.
    let candidates = attribute(
      &trace,
      Stage::SelectTopic,
      collab.trend_source.top_trends(self.config.trend_candidates),
    )
    .await?;

    let (topic, trending) = if candidates.is_empty() {
      warn!("No unused trends available; falling back to the default topic.");
      (self.config.default_topic.clone(), TrendingContext::default())
    } else {
      let topic = select_topic(&candidates);
      let used: Vec<String> = candidates
        .iter()
        .take(self.config.trends_marked_used)
        .map(|t| t.id.clone())
        .collect();
      attribute(
        &trace,
        Stage::SelectTopic,
        collab.trend_source.mark_used(used),
      )
      .await?;
      let trending = TrendingContext {
        topics: candidates.iter().map(|t| t.topic.clone()).collect(),
        search_queries: vec![topic.clone()],
        scraped_urls: candidates.iter().map(|t| t.source_url.clone()).collect(),
      };
      (topic, trending)
    };
    trace.push(Stage::SelectTopic);
    debug!(%topic, "Topic selected.");

    let sources = step(
      &mut trace,
      Stage::FetchSources,
      collab.trend_source.search_sources(topic.clone()),
    )
    .await?;

    info!(%topic, sources = sources.len(), "Generating content.");
    let content = step(
      &mut trace,
      Stage::GenerateContent,
      collab.content_generator.create_content(ContentRequest {
        topic: topic.clone(),
        trending: Some(trending),
        sources,
        instructions: None,
      }),
    )
    .await?;

    let seo = step(
      &mut trace,
      Stage::OptimizeSeo,
      collab.seo_optimizer.optimize(SeoInput {
        title: content.title.clone(),
        content: content.body.clone(),
        meta_description: content.meta_description.clone(),
        keywords: content.keywords.clone(),
        slug: content.slug.clone(),
      }),
    )
    .await?;

    let (thumbnail, banner) = {
      let thumbnail = attribute(
        &trace,
        Stage::GenerateImages,
        collab.image_generator.thumbnail(
          content.title.clone(),
          self.config.thumbnail_subtitle.clone(),
        ),
      )
      .await?;
      let banner = attribute(
        &trace,
        Stage::GenerateImages,
        collab
          .image_generator
          .banner(content.title.clone(), self.config.banner_category.clone()),
      )
      .await?;
      trace.push(Stage::GenerateImages);
      (thumbnail, banner)
    };

    let receipt = attribute(
      &trace,
      Stage::Publish,
      collab.publisher.publish(content.id.clone()),
    )
    .await?;
    if !receipt.success {
      // A refused publish fails the task with the publisher's own message.
      return Err(PipelineError {
        error: StageError::new(Stage::Publish, format!("publishing failed: {}", receipt.message)),
        completed: trace,
      });
    }
    trace.push(Stage::Publish);
    info!(title = %content.title, url = ?receipt.url, "Content published.");

    let mut result = TaskPayload::new();
    result.insert("content_id".into(), content.id.into());
    result.insert("title".into(), content.title.into());
    result.insert("topic".into(), topic.into());
    if let Some(url) = receipt.url {
      result.insert("published_url".into(), url.into());
    }
    result.insert("seo_score".into(), seo.score.into());
    result.insert("thumbnail".into(), thumbnail.display().to_string().into());
    result.insert("banner".into(), banner.display().to_string().into());
    Ok(result)
  }

  /// User-requested content: generated now, held for review, never
  /// auto-published.
  async fn run_custom(&self, parameters: &TaskPayload) -> Result<TaskPayload, PipelineError> {
    let mut trace = Vec::new();
    let collab = &self.collaborators;

    let topic = match parameters.get("topic").and_then(|v| v.as_str()) {
      Some(topic) if !topic.is_empty() => topic.to_string(),
      _ => {
        return Err(PipelineError {
          error: StageError::new(Stage::FetchSources, "missing required parameter `topic`"),
          completed: trace,
        })
      }
    };
    let instructions = parameters
      .get("custom_instructions")
      .and_then(|v| v.as_str())
      .map(str::to_string);

    let sources = step(
      &mut trace,
      Stage::FetchSources,
      collab.trend_source.search_sources(topic.clone()),
    )
    .await?;

    let content = step(
      &mut trace,
      Stage::GenerateContent,
      collab.content_generator.create_content(ContentRequest {
        topic,
        trending: None,
        sources,
        instructions,
      }),
    )
    .await?;

    let thumbnail = attribute(
      &trace,
      Stage::GenerateImages,
      collab.image_generator.thumbnail(
        content.title.clone(),
        self.config.thumbnail_subtitle.clone(),
      ),
    )
    .await?;
    let banner = attribute(
      &trace,
      Stage::GenerateImages,
      collab
        .image_generator
        .banner(content.title.clone(), self.config.banner_category.clone()),
    )
    .await?;
    trace.push(Stage::GenerateImages);

    // Review window instead of publishing; the content becomes eligible for
    // publishing only after the delay elapses.
    let review_at = Utc::now() + chrono::Duration::from_std(self.config.review_delay)
      .unwrap_or_else(|_| chrono::Duration::hours(24));
    trace.push(Stage::ScheduleReview);
    info!(title = %content.title, %review_at, "Content generated and held for review.");

    let mut result = TaskPayload::new();
    result.insert("content_id".into(), content.id.into());
    result.insert("title".into(), content.title.into());
    result.insert("status".into(), "pending_review".into());
    result.insert("review_at".into(), review_at.to_rfc3339().into());
    result.insert("thumbnail".into(), thumbnail.display().to_string().into());
    result.insert("banner".into(), banner.display().to_string().into());
    Ok(result)
  }
}

/// Awaits one collaborator call, recording the stage on success and
/// converting a failure into a `PipelineError` carrying the trace so far.
async fn step<T>(
  trace: &mut Vec<Stage>,
  stage: Stage,
  fut: impl Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, PipelineError> {
  match fut.await {
    Ok(value) => {
      trace.push(stage);
      Ok(value)
    }
    Err(e) => Err(PipelineError {
      error: StageError::new(stage, e.0),
      completed: trace.clone(),
    }),
  }
}

/// Like [`step`] but for a call that is part of a stage with multiple
/// collaborator calls; the caller records the stage once all calls succeed.
async fn attribute<T>(
  trace: &[Stage],
  stage: Stage,
  fut: impl Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, PipelineError> {
  fut.await.map_err(|e| PipelineError {
    error: StageError::new(stage, e.0),
    completed: trace.to_vec(),
  })
}

/// Picks the highest-relevance trend and phrases it as a topic. Questions
/// pass through unchanged.
fn select_topic(candidates: &[Trend]) -> String {
  let best = candidates
    .iter()
    .max_by_key(|t| t.relevance_score)
    .expect("select_topic called with candidates");
  if best.topic.contains('?') {
    best.topic.clone()
  } else {
    format!("Understanding {}: A Practical Guide", best.topic)
  }
}
