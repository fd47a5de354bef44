//! Step interpreter and crawl driver
//!
//! [`ApiCrawler`] owns a validated manifest and runs its step tree against a
//! stack of named contexts:
//!
//! - `request` steps drive the paginator loop: render the URL template,
//!   merge paginator params, authenticate, issue the call, decode JSON,
//!   apply the result transformer, execute nested steps against a child
//!   context holding the page value, then merge the child's final data into
//!   the designated target context.
//! - `forEach` steps extract items (jq path or literal values), run nested
//!   steps per item serially or on a bounded worker pool, aggregate results
//!   in iteration order and merge the aggregate.
//!
//! All merges run under a crawl-wide lock so parallel iterations serialize
//! their context mutations. Cancellation is checked at every page, every
//! iteration, and across every blocking wait.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::context::{Context, ContextStore, ROOT_KEY};
use crate::error::{CrawlError, Result};
use crate::expr::{ExprEngine, VAR_CTX, VAR_NEW, VAR_RES};
use crate::limits::RateLimiter;
use crate::manifest::{Manifest, MergeDirective, RequestConfig, Step};
use crate::paginator::Paginator;
use crate::profile::{ProfileEvent, ProfileEventKind, Profiler, PROFILER_BUFFER};
use crate::template::TemplateResolver;
use crate::validate::validate_manifest;

/// Buffered records between the crawl and the stream consumer
const STREAM_BUFFER: usize = 64;

/// Manifest-driven API crawler
#[derive(Debug)]
pub struct ApiCrawler {
    manifest: Arc<Manifest>,
    client: reqwest::Client,
    profiler: Profiler,
    stream_tx: Option<mpsc::Sender<Value>>,
    stream_rx: Option<mpsc::Receiver<Value>>,
}

impl ApiCrawler {
    /// Build a crawler from a parsed manifest, validating it first
    pub fn new(manifest: Manifest) -> Result<Self> {
        let diagnostics = validate_manifest(&manifest);
        if !diagnostics.is_empty() {
            return Err(CrawlError::ValidationFailed { diagnostics });
        }

        let (stream_tx, stream_rx) = if manifest.stream {
            let (tx, rx) = mpsc::channel(STREAM_BUFFER);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        Ok(Self {
            manifest: Arc::new(manifest),
            client: reqwest::Client::new(),
            profiler: Profiler::disabled(),
            stream_tx,
            stream_rx,
        })
    }

    /// Parse, validate and build from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::new(Manifest::from_yaml(yaml)?)
    }

    /// Load, validate and build from a manifest file
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(Manifest::from_path(path)?)
    }

    /// Replace the HTTP client (connection pool injection, test transports)
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Receiver for streamed records; present when the manifest sets `stream`
    pub fn take_stream(&mut self) -> Option<mpsc::Receiver<Value>> {
        self.stream_rx.take()
    }

    /// Turn on profiling; events arrive on the returned channel
    pub fn enable_profiler(&mut self) -> mpsc::Receiver<ProfileEvent> {
        let (profiler, rx) = Profiler::channel(PROFILER_BUFFER);
        self.profiler = profiler;
        rx
    }

    /// Execute the crawl and return the root context's final data.
    ///
    /// Consumes the crawler so the stream channel closes when the crawl
    /// finishes and any stream consumer sees end-of-stream.
    pub async fn run(self, cancel: CancellationToken) -> Result<Value> {
        let exprs = Arc::new(ExprEngine::new());
        let global_auth = Authenticator::from_config(
            self.manifest.auth.as_ref(),
            self.client.clone(),
            Arc::clone(&exprs),
            self.profiler.clone(),
        )?;

        let engine = Engine {
            manifest: Arc::clone(&self.manifest),
            client: self.client.clone(),
            exprs,
            templates: Arc::new(TemplateResolver::new()),
            global_auth: Arc::new(global_auth),
            auth_overrides: Arc::new(DashMap::new()),
            profiler: self.profiler.clone(),
            stream_tx: self.stream_tx.clone(),
            merge_lock: Arc::new(Mutex::new(())),
        };

        let root_data = self
            .manifest
            .root_context
            .clone()
            .expect("validation requires rootContext");
        let store = ContextStore::with_root(root_data);
        let root = Arc::clone(store.lookup(ROOT_KEY).expect("store holds root"));

        let started = Instant::now();
        let root_event = engine.profiler.emit(
            ProfileEventKind::RootStart,
            "Crawl",
            None,
            json!({"steps": self.manifest.steps.len(), "stream": self.manifest.stream}),
        );

        for (i, step) in self.manifest.steps.iter().enumerate() {
            let exec = StepExecution {
                step: step.clone(),
                loc: format!("steps[{i}]"),
                store: store.clone(),
                current: Arc::clone(&root),
                parent_event: Some(root_event),
            };
            if let Err(e) = engine.execute_step(exec, &cancel).await {
                engine.profiler.emit(
                    ProfileEventKind::Error,
                    "Crawl Failed",
                    Some(root_event),
                    json!({"error": e.to_string(), "code": e.code()}),
                );
                return Err(e);
            }
        }

        engine.profiler.emit_end(
            ProfileEventKind::RootEnd,
            "Crawl",
            root_event,
            None,
            started,
            json!({}),
        );

        Ok(root.data())
    }
}

/// One step about to execute against a context store
#[derive(Clone)]
struct StepExecution {
    step: Step,
    /// Dotted manifest location, also the auth-override cache key
    loc: String,
    store: ContextStore,
    current: Arc<Context>,
    parent_event: Option<Uuid>,
}

/// Shared crawl machinery, cheap to clone into worker tasks
#[derive(Clone)]
struct Engine {
    manifest: Arc<Manifest>,
    client: reqwest::Client,
    exprs: Arc<ExprEngine>,
    templates: Arc<TemplateResolver>,
    global_auth: Arc<Authenticator>,
    /// Request-level override authenticators, shared across pages and
    /// iterations of the same step (keyed by manifest location)
    auth_overrides: Arc<DashMap<String, Arc<Authenticator>>>,
    profiler: Profiler,
    stream_tx: Option<mpsc::Sender<Value>>,
    /// Serializes every context mutation across parallel iterations
    merge_lock: Arc<Mutex<()>>,
}

impl Engine {
    fn execute_step<'a>(
        &'a self,
        exec: StepExecution,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if exec.step.is_request() {
                self.execute_request(exec, cancel).await
            } else {
                self.execute_for_each(exec, cancel).await
            }
        })
    }

    // ═══════════════════════════════════════════
    // REQUEST LIFECYCLE
    // ═══════════════════════════════════════════

    #[instrument(name = "request_step", skip_all, fields(step = %exec.step.name))]
    async fn execute_request(&self, exec: StepExecution, cancel: &CancellationToken) -> Result<()> {
        let step = &exec.step;
        let request_cfg = step.request.as_ref().expect("validated request step");

        let started = Instant::now();
        let step_event = self.profiler.emit(
            ProfileEventKind::RequestStepStart,
            format!("Request '{}'", step.name),
            exec.parent_event,
            json!({"url": request_cfg.url, "method": request_cfg.method}),
        );

        let auth = self.authenticator_for(&exec.loc, request_cfg)?;
        let mut paginator = Paginator::new(request_cfg.pagination.as_ref())?;

        loop {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            let page = paginator.next_from_state();
            let template_ctx = exec.store.template_context();

            // URL: a paginator-provided next URL wins over the template
            let url_str = match &page.next_page_url {
                Some(next) => next.clone(),
                None => self.templates.render(&request_cfg.url, &template_ctx)?,
            };
            let mut url =
                reqwest::Url::parse(&url_str).map_err(|e| CrawlError::InvalidUrl {
                    url: url_str.clone(),
                    details: e.to_string(),
                })?;
            merge_query(&mut url, &page.query);

            let page_event = self.profiler.emit(
                ProfileEventKind::RequestPageStart,
                format!("Request '{}' | page#{}", step.name, paginator.page_num() + 1),
                Some(step_event),
                json!({"url": url.as_str()}),
            );
            self.profiler.emit(
                ProfileEventKind::UrlComposition,
                "URL Composition",
                Some(page_event),
                json!({"template": request_cfg.url, "url": url.as_str()}),
            );

            // Body: configured structured body, paginator params win
            let mut body = request_cfg.body.clone().unwrap_or_default();
            for (k, v) in &page.body {
                body.insert(k.clone(), v.clone());
            }

            let method = reqwest::Method::from_bytes(
                request_cfg.method.to_ascii_uppercase().as_bytes(),
            )
            .map_err(|e| CrawlError::RequestBuildFailed {
                details: format!("invalid method '{}': {e}", request_cfg.method),
            })?;
            let mut request = self
                .client
                .request(method, url.clone())
                .build()
                .map_err(|e| CrawlError::RequestBuildFailed {
                    details: e.to_string(),
                })?;

            // Header priority (ascending): global < request < paginator
            for (name, value) in &self.manifest.headers {
                insert_header(&mut request, name, value)?;
            }
            for (name, value) in &request_cfg.headers {
                insert_header(&mut request, name, value)?;
            }
            for (name, value) in &page.headers {
                insert_header(&mut request, name, value)?;
            }

            if !body.is_empty() {
                let content_type = request_cfg.content_type().unwrap_or("application/json");
                let bytes = encode_body(content_type, &body)?;
                insert_header(&mut request, CONTENT_TYPE.as_str(), content_type)?;
                *request.body_mut() = Some(bytes.into());
            }

            auth.prepare_request(&mut request, Some(page_event)).await?;

            self.profiler.emit(
                ProfileEventKind::RequestDetails,
                "Request Details",
                Some(page_event),
                json!({
                    "url": url.as_str(),
                    "method": request_cfg.method,
                    "headers": request
                        .headers()
                        .keys()
                        .map(|k| k.as_str().to_string())
                        .collect::<Vec<_>>(),
                }),
            );
            info!(url = %url, step = %step.name, "issuing request");

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                result = self.client.execute(request) => {
                    result.map_err(|e| CrawlError::HttpFailed {
                        url: url.to_string(),
                        details: e.to_string(),
                    })?
                }
            };

            let status = response.status();
            let headers = response.headers().clone();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CrawlError::HttpFailed {
                    url: url.to_string(),
                    details: e.to_string(),
                })?;
            debug!(status = %status, bytes = bytes.len(), "got response");

            // A non-2xx status is not an error here: the body is decoded
            // as-is and stop conditions may inspect it.
            let decoded: Value =
                serde_json::from_slice(&bytes).map_err(|e| CrawlError::ResponseDecodeFailed {
                    url: url.to_string(),
                    details: e.to_string(),
                })?;
            self.profiler.emit(
                ProfileEventKind::RequestResponse,
                "Response",
                Some(page_event),
                json!({"status": status.as_u16(), "url": url.as_str()}),
            );

            let stop = paginator.advance(&self.exprs, &decoded, &headers)?;

            // Transform: exactly one value, with $ctx bound
            let transformed = match &step.result_transformer {
                Some(expr) => {
                    debug!(expression = %expr, "applying result transformer");
                    let value = self.exprs.eval_one_with_vars(
                        expr,
                        &decoded,
                        &[(VAR_CTX, &template_ctx)],
                    )?;
                    self.profiler.emit(
                        ProfileEventKind::ResponseTransform,
                        "Response Transformation",
                        Some(page_event),
                        json!({"expression": expr}),
                    );
                    value
                }
                None => decoded,
            };

            // Nested steps run against a child context holding the page value
            let child_key = if step.as_key.is_empty() {
                exec.current.key().to_string()
            } else {
                step.as_key.clone()
            };
            let child_store = exec
                .store
                .child_with(&child_key, &exec.current, transformed);
            let child = Arc::clone(child_store.lookup(&child_key).expect("just inserted"));

            for (i, nested) in step.steps.iter().enumerate() {
                let nested_exec = StepExecution {
                    step: nested.clone(),
                    loc: format!("{}.steps[{i}]", exec.loc),
                    store: child_store.clone(),
                    current: Arc::clone(&child),
                    parent_event: Some(page_event),
                };
                self.execute_step(nested_exec, cancel).await?;
            }

            // Whatever nested steps left in the child is the value to merge
            self.apply_step_merge(step, &exec, child.data(), &template_ctx)?;
            self.profiler.emit(
                ProfileEventKind::ContextMerge,
                "Response Merge",
                Some(page_event),
                json!({"target": exec.current.key()}),
            );

            if exec.current.depth() == 0 {
                self.drain_stream(&exec.current, cancel, Some(page_event))
                    .await?;
            }

            self.profiler.emit(
                ProfileEventKind::RequestPageEnd,
                format!("Request '{}' | page#{}", step.name, paginator.page_num()),
                Some(step_event),
                json!({"url": url.as_str()}),
            );

            if stop {
                break;
            }
        }

        self.profiler.emit_end(
            ProfileEventKind::RequestStepEnd,
            format!("Request '{}'", step.name),
            step_event,
            exec.parent_event,
            started,
            json!({"pages": paginator.page_num()}),
        );
        Ok(())
    }

    // ═══════════════════════════════════════════
    // FOREACH LIFECYCLE
    // ═══════════════════════════════════════════

    #[instrument(name = "for_each_step", skip_all, fields(step = %exec.step.name))]
    async fn execute_for_each(
        &self,
        exec: StepExecution,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let step = &exec.step;
        let started = Instant::now();
        let step_event = self.profiler.emit(
            ProfileEventKind::ForEachStepStart,
            format!("Foreach '{}'", step.name),
            exec.parent_event,
            json!({"as": step.as_key, "parallel": step.parallel}),
        );

        let items = self.extract_items(step, &exec)?;
        self.profiler.emit(
            ProfileEventKind::ItemSelection,
            format!("Foreach Extract '{}'", step.name),
            Some(step_event),
            json!({"items": items.len()}),
        );

        let limiter = step
            .rate_limit
            .as_ref()
            .map(|rl| Arc::new(RateLimiter::new(rl.requests_per_second, rl.burst)));

        let results = if step.parallel {
            self.iterate_parallel(&exec, items, limiter, step_event, cancel)
                .await?
        } else {
            self.iterate_serial(&exec, items, limiter, step_event, cancel)
                .await?
        };

        let aggregated = Value::Array(results);
        let template_ctx = exec.store.template_context();

        match step.merge_directive() {
            MergeDirective::Default => {
                // Patch the extracted location with the aggregated array.
                // Literal-values iteration has no path to patch; its effect
                // is whatever nested steps merged into ancestor contexts.
                if !step.path.is_empty() {
                    let patch = format!("{} = $new", step.path);
                    let _guard = self.merge_lock.lock();
                    let data = exec.current.data();
                    let updated = self
                        .exprs
                        .eval_one_with_vars(&patch, &data, &[(VAR_NEW, &aggregated)])
                        .map_err(merge_error)?;
                    exec.current.set_data(updated);
                }
            }
            directive => self.apply_merge_directive(directive, &exec, &aggregated, &template_ctx)?,
        }
        self.profiler.emit(
            ProfileEventKind::ContextMerge,
            format!("Foreach Merge '{}'", step.name),
            Some(step_event),
            json!({"target": exec.current.key()}),
        );

        if exec.current.depth() <= 1 {
            self.drain_stream(&exec.current, cancel, Some(step_event))
                .await?;
        }

        self.profiler.emit_end(
            ProfileEventKind::ForEachStepEnd,
            format!("Foreach '{}'", step.name),
            step_event,
            exec.parent_event,
            started,
            json!({}),
        );
        Ok(())
    }

    /// Extract iteration items from the jq path or the literal values
    fn extract_items(&self, step: &Step, exec: &StepExecution) -> Result<Vec<Value>> {
        if !step.path.is_empty() {
            debug!(path = %step.path, "extracting items from current context");
            let data = exec.current.data();
            let mut results = self.exprs.eval(&step.path, &data)?;
            // jq may yield the sequence as a single value; unwrap it
            if results.len() == 1 {
                if let Value::Array(items) = &results[0] {
                    results = items.clone();
                }
            }
            Ok(results)
        } else {
            // Literal values are wrapped so templates read `.<as>.value`
            Ok(step
                .values
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(|v| json!({ "value": v }))
                .collect())
        }
    }

    async fn iterate_serial(
        &self,
        exec: &StepExecution,
        items: Vec<Value>,
        limiter: Option<Arc<RateLimiter>>,
        step_event: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        let step = &exec.step;
        let mut results = Vec::with_capacity(items.len());

        for (idx, item) in items.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }
            if let Some(limiter) = &limiter {
                limiter.acquire(cancel).await?;
            }

            self.profiler.emit_for_worker(
                ProfileEventKind::ContextSelection,
                format!("Selection #{idx}"),
                Some(step_event),
                idx,
                json!({}),
            );

            let child_store = exec.store.child_with(&step.as_key, &exec.current, item);
            let child = Arc::clone(child_store.lookup(&step.as_key).expect("just inserted"));

            for (i, nested) in step.steps.iter().enumerate() {
                let nested_exec = StepExecution {
                    step: nested.clone(),
                    loc: format!("{}.steps[{i}]", exec.loc),
                    store: child_store.clone(),
                    current: Arc::clone(&child),
                    parent_event: Some(step_event),
                };
                self.execute_step(nested_exec, cancel).await?;
            }
            results.push(child.data());
        }
        Ok(results)
    }

    /// Bounded-parallel iteration; results keep iteration-index order
    async fn iterate_parallel(
        &self,
        exec: &StepExecution,
        items: Vec<Value>,
        limiter: Option<Arc<RateLimiter>>,
        step_event: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        let step = &exec.step;
        let concurrency = step.concurrency();
        self.profiler.emit(
            ProfileEventKind::ParallelismSetup,
            format!("Foreach '{}' workers", step.name),
            Some(step_event),
            json!({"maxConcurrency": concurrency, "items": items.len()}),
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let nested_steps = Arc::new(step.steps.clone());
        let total = items.len();
        let mut join_set = JoinSet::new();

        for (idx, item) in items.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            let engine = self.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            let limiter = limiter.clone();
            let nested_steps = Arc::clone(&nested_steps);
            let as_key = step.as_key.clone();
            let loc = exec.loc.clone();

            let child_store = exec.store.child_with(&as_key, &exec.current, item);
            let child = Arc::clone(child_store.lookup(&as_key).expect("just inserted"));

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                if cancel.is_cancelled() {
                    return (idx, Err(CrawlError::Cancelled));
                }
                if let Some(limiter) = &limiter {
                    if let Err(e) = limiter.acquire(&cancel).await {
                        return (idx, Err(e));
                    }
                }

                engine.profiler.emit_for_worker(
                    ProfileEventKind::ContextSelection,
                    format!("Selection #{idx}"),
                    Some(step_event),
                    idx,
                    json!({}),
                );

                for (i, nested) in nested_steps.iter().enumerate() {
                    let nested_exec = StepExecution {
                        step: nested.clone(),
                        loc: format!("{loc}.steps[{i}]"),
                        store: child_store.clone(),
                        current: Arc::clone(&child),
                        parent_event: Some(step_event),
                    };
                    if let Err(e) = engine.execute_step(nested_exec, &cancel).await {
                        return (idx, Err(e));
                    }
                }
                (idx, Ok(child.data()))
            });
        }

        // Aggregate by iteration index, not completion order
        let mut slots: Vec<Option<Value>> = vec![None; total];
        while let Some(joined) = join_set.join_next().await {
            let (idx, result) = match joined {
                Ok(pair) => pair,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => return Err(CrawlError::Cancelled),
            };
            slots[idx] = Some(result?);
        }
        Ok(slots
            .into_iter()
            .map(|slot| slot.expect("every iteration reports a result"))
            .collect())
    }

    // ═══════════════════════════════════════════
    // MERGES AND STREAMING
    // ═══════════════════════════════════════════

    /// Apply a request step's merge of the child's final value
    fn apply_step_merge(
        &self,
        step: &Step,
        exec: &StepExecution,
        incoming: Value,
        template_ctx: &Value,
    ) -> Result<()> {
        match step.merge_directive() {
            MergeDirective::Default => {
                let _guard = self.merge_lock.lock();
                let merged = default_merge(exec.current.data(), incoming);
                exec.current.set_data(merged);
                Ok(())
            }
            directive => self.apply_merge_directive(directive, exec, &incoming, template_ctx),
        }
    }

    /// Apply an explicit merge directive (not the default shallow merge)
    fn apply_merge_directive(
        &self,
        directive: MergeDirective<'_>,
        exec: &StepExecution,
        incoming: &Value,
        template_ctx: &Value,
    ) -> Result<()> {
        let (target, rule) = match directive {
            MergeDirective::Noop => return Ok(()),
            MergeDirective::On(rule) => (Arc::clone(&exec.current), rule),
            MergeDirective::WithParent(rule) => {
                let parent_key = exec.current.parent();
                let parent = exec.store.lookup(parent_key).ok_or_else(|| {
                    CrawlError::MergeTargetMissing {
                        name: parent_key.to_string(),
                    }
                })?;
                (Arc::clone(parent), rule)
            }
            MergeDirective::WithContext(rule) => {
                let target = exec.store.lookup(&rule.name).ok_or_else(|| {
                    CrawlError::MergeTargetMissing {
                        name: rule.name.clone(),
                    }
                })?;
                (Arc::clone(target), rule.rule.as_str())
            }
            MergeDirective::Default => unreachable!("default merge handled by callers"),
        };

        debug!(rule = %rule, target = %target.key(), "applying merge rule");
        let _guard = self.merge_lock.lock();
        let data = target.data();
        let updated = self
            .exprs
            .eval_one_with_vars(rule, &data, &[(VAR_RES, incoming), (VAR_CTX, template_ctx)])
            .map_err(merge_error)?;
        target.set_data(updated);
        Ok(())
    }

    /// Emit the context's sequence entries on the stream, then reset it
    async fn drain_stream(
        &self,
        context: &Arc<Context>,
        cancel: &CancellationToken,
        parent_event: Option<Uuid>,
    ) -> Result<()> {
        let Some(tx) = &self.stream_tx else {
            return Ok(());
        };

        let items = {
            let _guard = self.merge_lock.lock();
            match context.data() {
                Value::Array(items) => {
                    context.set_data(Value::Array(Vec::new()));
                    items
                }
                // Only sequence payloads stream
                _ => return Ok(()),
            }
        };

        for (i, item) in items.into_iter().enumerate() {
            self.profiler.emit(
                ProfileEventKind::StreamResult,
                format!("Stream result #{i}"),
                parent_event,
                json!({}),
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                // A dropped receiver means the consumer is done; discard.
                result = tx.send(item) => {
                    if result.is_err() {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Request-level override authenticator, else the global one.
    /// Overrides are cached by step location so every page and iteration of
    /// the same step shares one credential cache.
    fn authenticator_for(
        &self,
        loc: &str,
        request_cfg: &RequestConfig,
    ) -> Result<Arc<Authenticator>> {
        let Some(auth_cfg) = &request_cfg.auth else {
            return Ok(Arc::clone(&self.global_auth));
        };

        if let Some(cached) = self.auth_overrides.get(loc) {
            return Ok(Arc::clone(&cached));
        }
        let auth = Arc::new(Authenticator::from_config(
            Some(auth_cfg),
            self.client.clone(),
            Arc::clone(&self.exprs),
            self.profiler.clone(),
        )?);
        self.auth_overrides.insert(loc.to_string(), Arc::clone(&auth));
        Ok(auth)
    }
}

fn merge_error(e: CrawlError) -> CrawlError {
    match e {
        CrawlError::WrongCardinality { .. } => e,
        other => CrawlError::MergeFailed {
            reason: other.to_string(),
        },
    }
}

/// Shallow merge: append sequences, overlay mappings, replace otherwise
fn default_merge(target: Value, incoming: Value) -> Value {
    match (target, incoming) {
        (Value::Array(mut target), Value::Array(incoming)) => {
            target.extend(incoming);
            Value::Array(target)
        }
        (Value::Object(mut target), Value::Object(incoming)) => {
            for (k, v) in incoming {
                target.insert(k, v);
            }
            Value::Object(target)
        }
        // Shape mismatch replaces the target
        (_, incoming) => incoming,
    }
}

/// Merge paginator query params into the URL; the paginator wins on conflict
fn merge_query(url: &mut reqwest::Url, params: &HashMap<String, String>) {
    if params.is_empty() {
        return;
    }
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !params.contains_key(k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut added: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    added.sort();
    pairs.extend(added);

    url.set_query(None);
    if !pairs.is_empty() {
        let mut serializer = url.query_pairs_mut();
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
    }
}

fn insert_header(request: &mut reqwest::Request, name: &str, value: &str) -> Result<()> {
    let name = name
        .parse::<HeaderName>()
        .map_err(|e| CrawlError::RequestBuildFailed {
            details: format!("invalid header name '{name}': {e}"),
        })?;
    let value = HeaderValue::from_str(value).map_err(|e| CrawlError::RequestBuildFailed {
        details: format!("invalid header value for '{name}': {e}"),
    })?;
    request.headers_mut().insert(name, value);
    Ok(())
}

/// Serialize a structured body per content type
pub(crate) fn encode_body(content_type: &str, body: &Map<String, Value>) -> Result<Vec<u8>> {
    let main_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match main_type.as_str() {
        "application/json" => {
            serde_json::to_vec(body).map_err(|e| CrawlError::BodyEncodingFailed {
                details: e.to_string(),
            })
        }
        "application/x-www-form-urlencoded" => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (k, v) in body {
                serializer.append_pair(k, &form_value(v));
            }
            Ok(serializer.finish().into_bytes())
        }
        _ => Err(CrawlError::UnsupportedContentType {
            content_type: content_type.to_string(),
        }),
    }
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build a one-shot request from a config: no templating, no pagination.
/// Login sub-requests go through here so they mirror main-request building.
pub(crate) fn build_plain_request(
    client: &reqwest::Client,
    cfg: &RequestConfig,
) -> Result<reqwest::Request> {
    let url = reqwest::Url::parse(&cfg.url).map_err(|e| CrawlError::InvalidUrl {
        url: cfg.url.clone(),
        details: e.to_string(),
    })?;
    let method = reqwest::Method::from_bytes(cfg.method.to_ascii_uppercase().as_bytes()).map_err(
        |e| CrawlError::RequestBuildFailed {
            details: format!("invalid method '{}': {e}", cfg.method),
        },
    )?;

    let mut request =
        client
            .request(method, url)
            .build()
            .map_err(|e| CrawlError::RequestBuildFailed {
                details: e.to_string(),
            })?;

    for (name, value) in &cfg.headers {
        insert_header(&mut request, name, value)?;
    }

    if let Some(body) = &cfg.body {
        if !body.is_empty() {
            let content_type = cfg.content_type().unwrap_or("application/json");
            let bytes = encode_body(content_type, body)?;
            insert_header(&mut request, CONTENT_TYPE.as_str(), content_type)?;
            *request.body_mut() = Some(bytes.into());
        }
    }
    Ok(request)
}
