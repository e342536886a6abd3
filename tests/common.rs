//! tests/common.rs
//! Shared helpers for integration tests: scripted mock collaborators and
//! scheduler builders.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use tracing_subscriber::fmt::TestWriter;

use presswork::pipeline::context::try_current_context;
use presswork::pipeline::{
  CollabFuture, CollaboratorError, Collaborators, ContentGenerator, ContentRequest,
  GeneratedContent, ImageGenerator, PublishReceipt, Publisher, SeoInput, SeoOptimizer, SeoReport,
  SourceRef, Trend, TrendSource,
};
use presswork::{PipelineConfig, Presswork};

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

/// A scripted implementation of every collaborator contract.
///
/// One `Arc<MockCollab>` is handed to the scheduler five times (once per
/// trait); tests flip the knobs and read the recordings.
#[derive(Default)]
pub struct MockCollab {
  /// Unused trends the source will report, best-first.
  pub trends: Mutex<Vec<Trend>>,
  /// Ids passed to `mark_used`.
  pub used_ids: Mutex<Vec<String>>,
  /// When false, `publish` returns `success = false` with `publish_message`.
  pub publish_ok: AtomicBool,
  pub publish_message: Mutex<String>,
  /// When true, `create_content` fails like malformed model output.
  pub fail_generation: AtomicBool,
  /// Artificial latency inside `discover_trends` / `create_content`.
  pub discover_delay: Mutex<StdDuration>,
  pub generate_delay: Mutex<StdDuration>,
  // Call recordings
  pub discover_calls: AtomicUsize,
  pub create_calls: AtomicUsize,
  pub publish_calls: AtomicUsize,
  pub last_request: Mutex<Option<ContentRequest>>,
  // Concurrency observation across discover + generate
  pub active: AtomicUsize,
  pub max_active: AtomicUsize,
  /// Trigger ids observed via the pipeline task-local, one per discover
  /// call (`None` for manual runs).
  pub seen_trigger_ids: Mutex<Vec<Option<String>>>,
}

impl MockCollab {
  pub fn new() -> Arc<Self> {
    let mock = Self {
      publish_ok: AtomicBool::new(true),
      publish_message: Mutex::new("published".to_string()),
      ..Self::default()
    };
    Arc::new(mock)
  }

  /// Seeds `count` unused trends with ascending relevance.
  pub fn with_trends(self: Arc<Self>, count: usize) -> Arc<Self> {
    let mut trends = self.trends.lock();
    for i in 0..count {
      trends.push(Trend {
        id: format!("trend-{i}"),
        topic: format!("Trending topic {i}"),
        description: format!("Discussion around topic {i}"),
        relevance_score: (i + 1) as u32,
        source_url: format!("https://news.example.com/{i}"),
      });
    }
    drop(trends);
    self
  }

  fn track_start(&self) {
    let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_active.fetch_max(now_active, Ordering::SeqCst);
  }

  fn track_end(&self) {
    self.active.fetch_sub(1, Ordering::SeqCst);
  }
}

impl TrendSource for MockCollab {
  fn discover_trends(&self) -> CollabFuture<'_, BTreeMap<String, Vec<Trend>>> {
    Box::pin(async move {
      self.discover_calls.fetch_add(1, Ordering::SeqCst);
      self
        .seen_trigger_ids
        .lock()
        .push(try_current_context().and_then(|ctx| ctx.trigger_id));
      self.track_start();
      let delay = *self.discover_delay.lock();
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      self.track_end();

      let trends = self.trends.lock().clone();
      let mut by_source = BTreeMap::new();
      by_source.insert("news".to_string(), trends);
      by_source.insert("forums".to_string(), Vec::new());
      Ok(by_source)
    })
  }

  fn top_trends(&self, limit: usize) -> CollabFuture<'_, Vec<Trend>> {
    Box::pin(async move {
      let used = self.used_ids.lock().clone();
      let mut trends: Vec<Trend> = self
        .trends
        .lock()
        .iter()
        .filter(|t| !used.contains(&t.id))
        .cloned()
        .collect();
      trends.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
      trends.truncate(limit);
      Ok(trends)
    })
  }

  fn mark_used(&self, ids: Vec<String>) -> CollabFuture<'_, ()> {
    Box::pin(async move {
      self.used_ids.lock().extend(ids);
      Ok(())
    })
  }

  fn search_sources(&self, topic: String) -> CollabFuture<'_, Vec<SourceRef>> {
    Box::pin(async move {
      Ok(vec![SourceRef {
        kind: "article".to_string(),
        title: format!("Research on {topic}"),
        author: "Example Author".to_string(),
        url: "https://sources.example.com/1".to_string(),
        credibility_score: 8,
        relevance_score: 9,
      }])
    })
  }
}

impl ContentGenerator for MockCollab {
  fn create_content(&self, request: ContentRequest) -> CollabFuture<'_, GeneratedContent> {
    Box::pin(async move {
      self.create_calls.fetch_add(1, Ordering::SeqCst);
      self.track_start();
      let delay = *self.generate_delay.lock();
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      self.track_end();

      if self.fail_generation.load(Ordering::SeqCst) {
        return Err(CollaboratorError::new("model returned malformed output"));
      }

      let topic = request.topic.clone();
      *self.last_request.lock() = Some(request);
      Ok(GeneratedContent {
        id: format!("content-{}", self.create_calls.load(Ordering::SeqCst)),
        title: topic.clone(),
        slug: topic.to_lowercase().replace(' ', "-"),
        body: format!("A thorough article about {topic}."),
        summary: format!("Summary of {topic}"),
        meta_description: format!("All about {topic}"),
        keywords: vec!["careers".to_string(), "students".to_string()],
        word_count: 480,
        reading_time_minutes: 3,
      })
    })
  }
}

impl SeoOptimizer for MockCollab {
  fn optimize(&self, input: SeoInput) -> CollabFuture<'_, SeoReport> {
    Box::pin(async move {
      Ok(SeoReport {
        meta_description: input.meta_description,
        keywords: input.keywords,
        seo_title: input.title,
        score: 87,
        recommendations: vec!["add internal links".to_string()],
        schema: serde_json::json!({"@type": "Article"}),
        slug_suggestions: vec![input.slug],
      })
    })
  }
}

impl ImageGenerator for MockCollab {
  fn thumbnail(&self, title: String, _subtitle: String) -> CollabFuture<'_, PathBuf> {
    Box::pin(async move { Ok(PathBuf::from(format!("/tmp/thumb-{}.png", slugify(&title)))) })
  }

  fn banner(&self, title: String, _category: String) -> CollabFuture<'_, PathBuf> {
    Box::pin(async move { Ok(PathBuf::from(format!("/tmp/banner-{}.png", slugify(&title)))) })
  }
}

impl Publisher for MockCollab {
  fn publish(&self, content_id: String) -> CollabFuture<'_, PublishReceipt> {
    Box::pin(async move {
      self.publish_calls.fetch_add(1, Ordering::SeqCst);
      if self.publish_ok.load(Ordering::SeqCst) {
        Ok(PublishReceipt {
          success: true,
          post_id: Some(format!("post-{content_id}")),
          url: Some(format!("https://blog.example.com/{content_id}")),
          message: "published".to_string(),
        })
      } else {
        Ok(PublishReceipt {
          success: false,
          post_id: None,
          url: None,
          message: self.publish_message.lock().clone(),
        })
      }
    })
  }
}

fn slugify(s: &str) -> String {
  s.to_lowercase().replace(' ', "-")
}

/// Bundles one mock behind all five collaborator handles.
pub fn collaborators(mock: &Arc<MockCollab>) -> Collaborators {
  Collaborators {
    trend_source: mock.clone(),
    content_generator: mock.clone(),
    seo_optimizer: mock.clone(),
    image_generator: mock.clone(),
    publisher: mock.clone(),
  }
}

/// A config with test-sized delays; the standing schedule stays at its
/// defaults unless a test overrides it.
pub fn test_config() -> PipelineConfig {
  PipelineConfig {
    retry_rearm_delay: StdDuration::from_millis(100),
    review_delay: StdDuration::from_secs(24 * 3600),
    ..PipelineConfig::default()
  }
}

// Builds a dormant scheduler around the mock; tests call `.start()` when
// they need the loop.
pub fn build_scheduler(mock: &Arc<MockCollab>, workers: usize, config: PipelineConfig) -> Presswork {
  Presswork::builder()
    .collaborators(collaborators(mock))
    .workers(workers)
    .config(config)
    .standing_schedule(false)
    .build()
    .expect("scheduler must build")
}

/// Polls `cond` every 25ms until it holds or `timeout` elapses.
pub async fn wait_for(timeout: StdDuration, mut cond: impl FnMut() -> bool) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    if cond() {
      return true;
    }
    if tokio::time::Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(StdDuration::from_millis(25)).await;
  }
}
