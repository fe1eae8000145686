//! Failover proxy controller.
//!
//! # Responsibilities
//! - Pick a backend for a request and proxy the request to it
//! - Feed every attempt's outcome back into backend health
//! - Retry a transport failure once on a different backend when that is safe
//!
//! # Design Decisions
//! - At most two attempts per request, never the same backend twice
//! - Busy answers are surfaced, never retried locally
//! - The connection permit lives for the whole attempt, so a probe slot
//!   stays claimed until the probe has an outcome
//! - A failed backend's probe carries a request ahead of healthy backends
//!   only when that request could still fail over
//! - A stale idle connection is retried once on a new connection before
//!   anything is held against the backend

use std::sync::Arc;
use std::time::Instant;

use crate::health::admission::ConnectionPermit;
use crate::load_balancer::{BackendSelector, ProbeOrder};
use crate::observability::metrics;
use crate::proxy::exchange::{ProxyRequest, ResponseSink, StickySource};
use crate::proxy::outcome::{ProxyError, RequestOutcome};
use crate::resilience::retries::{FailoverPolicy, RetryBlock};
use crate::upstream::{ConnectionPool, UpstreamConnection};

/// How a successfully proxied request was served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyReport {
    /// Backend that produced the response.
    pub backend: String,
    /// Whether the first backend failed and the request was replayed.
    pub failed_over: bool,
}

/// Drives requests through selection, proxying and failover.
#[derive(Debug)]
pub struct FailoverProxyController<P: ConnectionPool> {
    selector: Arc<BackendSelector>,
    pool: Arc<P>,
    policy: FailoverPolicy,
    sticky: StickySource,
}

impl<P: ConnectionPool> FailoverProxyController<P> {
    pub fn new(
        selector: Arc<BackendSelector>,
        pool: Arc<P>,
        policy: FailoverPolicy,
        sticky: StickySource,
    ) -> Self {
        Self {
            selector,
            pool,
            policy,
            sticky,
        }
    }

    pub fn selector(&self) -> &Arc<BackendSelector> {
        &self.selector
    }

    /// Proxy one request.
    ///
    /// On `Ok` the response holds the backend's answer. On `Err` nothing
    /// from a failed attempt is left in an uncommitted response.
    pub async fn proxy<S: ResponseSink>(
        &self,
        request: &ProxyRequest,
        response: &mut S,
    ) -> Result<ProxyReport, ProxyError> {
        let sticky_key = self.sticky.resolve(request);

        let probes = if self.policy.check(&request.method, false).is_ok() {
            ProbeOrder::First
        } else {
            ProbeOrder::Last
        };

        let Some(primary) = self.selector.select_with(sticky_key.as_deref(), None, probes) else {
            tracing::warn!(request_id = %request.request_id, "No backend available");
            return Err(ProxyError::NoBackendAvailable);
        };
        let primary_id = primary.id.clone();

        let message = match self.attempt(primary, request, response).await {
            RequestOutcome::Ok { .. } => {
                return Ok(ProxyReport {
                    backend: primary_id,
                    failed_over: false,
                })
            }
            RequestOutcome::Busy { message } => {
                response.reset();
                return Err(ProxyError::Busy {
                    backend: primary_id,
                    message,
                });
            }
            RequestOutcome::Fail { message } => message,
        };

        if let Err(reason) = self.policy.check(&request.method, response.is_committed()) {
            tracing::warn!(
                request_id = %request.request_id,
                backend = %primary_id,
                %reason,
                "Request failed and will not be retried"
            );
            response.reset();

            return Err(match reason {
                RetryBlock::Disabled => ProxyError::TransportFailure {
                    backend: primary_id,
                    message,
                },
                reason => ProxyError::NonIdempotentFailure {
                    backend: primary_id,
                    message,
                    reason,
                },
            });
        }

        let Some(alternate) = self
            .selector
            .select(sticky_key.as_deref(), Some(primary_id.as_str()))
        else {
            tracing::warn!(
                request_id = %request.request_id,
                backend = %primary_id,
                "No alternate backend for failover"
            );
            response.reset();
            return Err(ProxyError::TransportFailure {
                backend: primary_id,
                message,
            });
        };
        let alternate_id = alternate.id.clone();

        tracing::info!(
            request_id = %request.request_id,
            from = %primary_id,
            to = %alternate_id,
            "Failing over"
        );
        metrics::record_failover(&primary_id, &alternate_id);
        response.reset();

        match self.attempt(alternate, request, response).await {
            RequestOutcome::Ok { .. } => Ok(ProxyReport {
                backend: alternate_id,
                failed_over: true,
            }),
            RequestOutcome::Busy { message } => {
                response.reset();
                Err(ProxyError::Busy {
                    backend: alternate_id,
                    message,
                })
            }
            RequestOutcome::Fail { message } => {
                response.reset();
                Err(ProxyError::TransportFailure {
                    backend: alternate_id,
                    message,
                })
            }
        }
    }

    /// One attempt against the permitted backend, health feedback included.
    async fn attempt<S: ResponseSink>(
        &self,
        permit: ConnectionPermit,
        request: &ProxyRequest,
        response: &mut S,
    ) -> RequestOutcome {
        let started = Instant::now();
        let backend = permit.backend().clone();

        let outcome = match self.pool.open(&backend).await {
            Ok(conn) if conn.is_reused() => {
                permit.mark_reused();

                match self.exchange(conn, request, response).await {
                    (RequestOutcome::Fail { message }, true) => {
                        tracing::debug!(
                            request_id = %request.request_id,
                            backend = %backend.id,
                            error = %message,
                            "Idle connection went stale, reconnecting"
                        );
                        response.reset();

                        match self.pool.open_new(&backend).await {
                            Ok(conn) => {
                                permit.mark_connected();
                                self.exchange(conn, request, response).await.0
                            }
                            Err(e) => e.into(),
                        }
                    }
                    (outcome, _) => outcome,
                }
            }
            Ok(conn) => {
                permit.mark_connected();
                self.exchange(conn, request, response).await.0
            }
            Err(e) => e.into(),
        };

        match &outcome {
            RequestOutcome::Ok { .. } => backend.on_success(),
            RequestOutcome::Busy { .. } => backend.on_busy(),
            RequestOutcome::Fail { .. } => {
                backend.on_fail();
                self.pool.purge(&backend);
            }
        }
        drop(permit);

        let elapsed = started.elapsed();
        match &outcome {
            RequestOutcome::Fail { message } => tracing::warn!(
                request_id = %request.request_id,
                backend = %backend.id,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %message,
                "Proxy attempt failed"
            ),
            other => tracing::debug!(
                request_id = %request.request_id,
                backend = %backend.id,
                elapsed_ms = elapsed.as_millis() as u64,
                outcome = other.label(),
                "Proxy attempt finished"
            ),
        }
        metrics::record_attempt(&backend.id, outcome.label(), elapsed);

        outcome
    }

    /// Send on `conn` and hand it back to the pool. The flag is set when a
    /// reused connection failed before the backend answered anything.
    async fn exchange<S: ResponseSink>(
        &self,
        mut conn: P::Connection,
        request: &ProxyRequest,
        response: &mut S,
    ) -> (RequestOutcome, bool) {
        let outcome = conn.send(request, response).await;
        let stale = conn.is_reused()
            && !conn.response_started()
            && matches!(outcome, RequestOutcome::Fail { .. });

        match outcome {
            RequestOutcome::Ok { keep_alive: true } => self.pool.release(conn),
            _ => self.pool.close(conn),
        }
        (outcome, stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::clock::ManualClock;
    use crate::health::state::HealthState;
    use crate::load_balancer::backend::{Backend, BackendSettings};
    use crate::load_balancer::Strategy;
    use crate::proxy::exchange::BufferedResponse;
    use crate::upstream::OpenError;
    use axum::http::{HeaderMap, Method, StatusCode, Uri};
    use hyper::body::Bytes;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Script {
        Ok,
        KeepAlive,
        Busy,
        Fail,
        CommitThenFail,
        OpenFail,
        OpenBusy,
        /// Idle connection the backend already closed; reconnecting works.
        StaleIdle,
        /// Idle connection went stale and the backend is down.
        StaleIdleDown,
        /// Idle connection that fails after the response head.
        IdleFailMidResponse,
    }

    #[derive(Debug, Default)]
    struct ScriptedPool {
        scripts: Mutex<HashMap<String, Script>>,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedPool {
        fn script(&self, backend: &str, script: Script) {
            self.scripts.lock().unwrap().insert(backend.to_string(), script);
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    struct ScriptedConnection {
        backend: String,
        script: Script,
        reused: bool,
        started: bool,
    }

    impl ScriptedConnection {
        fn new(backend: &str, script: Script, reused: bool) -> Self {
            Self {
                backend: backend.to_string(),
                script,
                reused,
                started: false,
            }
        }
    }

    impl UpstreamConnection for ScriptedConnection {
        async fn send<S: ResponseSink>(&mut self, _request: &ProxyRequest, response: &mut S) -> RequestOutcome {
            match self.script {
                Script::StaleIdle | Script::StaleIdleDown => RequestOutcome::fail("connection closed before message completed"),
                Script::IdleFailMidResponse => {
                    self.started = true;
                    response.set_head(StatusCode::OK, HeaderMap::new());
                    RequestOutcome::fail("connection reset")
                }
                Script::Ok | Script::KeepAlive => {
                    self.started = true;
                    response.set_head(StatusCode::OK, HeaderMap::new());
                    let _ = response.write_body(Bytes::from(self.backend.clone())).await;
                    RequestOutcome::Ok {
                        keep_alive: self.script == Script::KeepAlive,
                    }
                }
                Script::Busy => RequestOutcome::busy("503"),
                Script::Fail => {
                    self.started = true;
                    response.set_head(StatusCode::OK, HeaderMap::new());
                    let _ = response.write_body(Bytes::from_static(b"partial")).await;
                    RequestOutcome::fail("connection reset")
                }
                Script::CommitThenFail => {
                    self.started = true;
                    response.set_head(StatusCode::OK, HeaderMap::new());
                    let _ = response.write_body(Bytes::from_static(b"partial")).await;
                    let _ = response.commit().await;
                    RequestOutcome::fail("connection reset")
                }
                Script::OpenFail | Script::OpenBusy => unreachable!(),
            }
        }

        fn is_reused(&self) -> bool {
            self.reused
        }

        fn response_started(&self) -> bool {
            self.started
        }
    }

    impl ConnectionPool for ScriptedPool {
        type Connection = ScriptedConnection;

        async fn open(&self, backend: &Arc<Backend>) -> Result<ScriptedConnection, OpenError> {
            self.record(format!("open {}", backend.id));
            let script = {
                let scripts = self.scripts.lock().unwrap();
                scripts.get(&backend.id).copied().unwrap_or(Script::Ok)
            };

            match script {
                Script::OpenFail => Err(OpenError::Fail("connection refused".into())),
                Script::OpenBusy => Err(OpenError::Busy("no capacity".into())),
                Script::StaleIdle | Script::StaleIdleDown | Script::IdleFailMidResponse => {
                    Ok(ScriptedConnection::new(&backend.id, script, true))
                }
                script => Ok(ScriptedConnection::new(&backend.id, script, false)),
            }
        }

        async fn open_new(&self, backend: &Arc<Backend>) -> Result<ScriptedConnection, OpenError> {
            self.record(format!("open_new {}", backend.id));
            let script = {
                let scripts = self.scripts.lock().unwrap();
                scripts.get(&backend.id).copied().unwrap_or(Script::Ok)
            };

            match script {
                Script::StaleIdleDown | Script::OpenFail => {
                    Err(OpenError::Fail("connection refused".into()))
                }
                _ => Ok(ScriptedConnection::new(&backend.id, Script::Ok, false)),
            }
        }

        fn release(&self, conn: ScriptedConnection) {
            self.record(format!("release {}", conn.backend));
        }

        fn close(&self, conn: ScriptedConnection) {
            self.record(format!("close {}", conn.backend));
        }

        fn purge(&self, backend: &Backend) {
            self.record(format!("purge {}", backend.id));
        }
    }

    struct Fixture {
        controller: FailoverProxyController<ScriptedPool>,
        pool: Arc<ScriptedPool>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new(n: usize) -> Self {
            Self::with_policy(n, FailoverPolicy::default())
        }

        fn with_policy(n: usize, policy: FailoverPolicy) -> Self {
            Self::build(n, policy, Strategy::RoundRobin)
        }

        fn build(n: usize, policy: FailoverPolicy, strategy: Strategy) -> Self {
            let clock = Arc::new(ManualClock::new(1_000));
            let backends = (0..n)
                .map(|i| {
                    Arc::new(Backend::with_clock(
                        format!("b{}", i),
                        format!("127.0.0.1:{}", 9100 + i),
                        BackendSettings::default(),
                        clock.clone(),
                    ))
                })
                .collect();
            let selector = Arc::new(BackendSelector::new(strategy, backends));
            let pool = Arc::new(ScriptedPool::default());
            let controller =
                FailoverProxyController::new(selector, pool.clone(), policy, StickySource::disabled());

            Self {
                controller,
                pool,
                clock,
            }
        }

        fn backend(&self, id: &str) -> &Arc<Backend> {
            self.controller.selector().backend(id).unwrap()
        }

        fn fails(&self, id: &str) -> u64 {
            self.backend(id).snapshot().fail_count_total
        }
    }

    fn request(method: Method) -> ProxyRequest {
        ProxyRequest::new(method, Uri::from_static("/item")).with_request_id("req-1")
    }

    #[tokio::test]
    async fn test_success_on_first_backend() {
        let fx = Fixture::new(3);
        fx.pool.script("b0", Script::KeepAlive);
        let mut res = BufferedResponse::new();

        let report = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap();

        assert_eq!(report, ProxyReport { backend: "b0".into(), failed_over: false });
        assert_eq!(res.body, b"b0");
        assert_eq!(fx.pool.log(), vec!["open b0", "release b0"]);
        assert_eq!(fx.backend("b0").snapshot().success_count_total, 1);
        assert_eq!(fx.backend("b0").health.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_get_fails_over_once() {
        let fx = Fixture::new(3);
        fx.pool.script("b0", Script::Fail);
        let mut res = BufferedResponse::new();

        let report = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap();

        assert_eq!(report, ProxyReport { backend: "b1".into(), failed_over: true });
        assert_eq!(res.body, b"b1");
        assert_eq!(res.reset_count(), 1);
        assert_eq!(fx.fails("b0"), 1);
        assert_eq!(fx.backend("b0").state(), HealthState::Fail);
        assert_eq!(fx.backend("b1").state(), HealthState::Active);
        assert_eq!(
            fx.pool.log(),
            vec!["open b0", "close b0", "purge b0", "open b1", "close b1"]
        );
    }

    #[tokio::test]
    async fn test_both_fail_surfaces_one_error() {
        let fx = Fixture::new(3);
        fx.pool.script("b0", Script::Fail);
        fx.pool.script("b1", Script::OpenFail);
        let mut res = BufferedResponse::new();

        let err = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap_err();

        assert_eq!(
            err,
            ProxyError::TransportFailure {
                backend: "b1".into(),
                message: "connection refused".into(),
            }
        );
        assert_eq!(fx.fails("b0"), 1);
        assert_eq!(fx.fails("b1"), 1);
        assert_eq!(fx.fails("b2"), 0);
        assert!(res.body.is_empty());
        assert_eq!(fx.pool.log().iter().filter(|e| e.starts_with("open")).count(), 2);
    }

    #[tokio::test]
    async fn test_post_not_retried() {
        let fx = Fixture::new(3);
        fx.pool.script("b0", Script::Fail);
        let mut res = BufferedResponse::new();

        let err = fx.controller.proxy(&request(Method::POST), &mut res).await.unwrap_err();

        assert!(matches!(
            err,
            ProxyError::NonIdempotentFailure { ref backend, reason: RetryBlock::Method(Method::POST), .. } if backend == "b0"
        ));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(fx.pool.log(), vec!["open b0", "close b0", "purge b0"]);
        assert_eq!(fx.fails("b1"), 0);
    }

    #[tokio::test]
    async fn test_committed_not_retried() {
        let fx = Fixture::new(3);
        fx.pool.script("b0", Script::CommitThenFail);
        let mut res = BufferedResponse::new();

        let err = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap_err();

        assert!(matches!(
            err,
            ProxyError::NonIdempotentFailure { reason: RetryBlock::Committed, .. }
        ));
        assert_eq!(res.body, b"partial");
        assert_eq!(fx.pool.log().iter().filter(|e| e.starts_with("open")).count(), 1);
    }

    #[tokio::test]
    async fn test_failover_disabled() {
        let fx = Fixture::with_policy(2, FailoverPolicy::new(false, vec![Method::GET]));
        fx.pool.script("b0", Script::Fail);
        let mut res = BufferedResponse::new();

        let err = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap_err();

        assert!(matches!(err, ProxyError::TransportFailure { ref backend, .. } if backend == "b0"));
        assert_eq!(fx.fails("b1"), 0);
    }

    #[tokio::test]
    async fn test_no_alternate() {
        let fx = Fixture::new(1);
        fx.pool.script("b0", Script::OpenFail);
        let mut res = BufferedResponse::new();

        let err = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap_err();

        assert_eq!(
            err,
            ProxyError::TransportFailure {
                backend: "b0".into(),
                message: "connection refused".into(),
            }
        );
        assert_eq!(fx.fails("b0"), 1);
    }

    #[tokio::test]
    async fn test_no_backend_available() {
        let fx = Fixture::new(2);
        fx.backend("b0").disable();
        fx.backend("b1").close();
        let mut res = BufferedResponse::new();

        let err = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap_err();

        assert_eq!(err, ProxyError::NoBackendAvailable);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(fx.pool.log().is_empty());
    }

    #[tokio::test]
    async fn test_busy_not_retried() {
        let fx = Fixture::new(3);
        fx.pool.script("b0", Script::Busy);
        let mut res = BufferedResponse::new();

        let err = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap_err();

        assert!(matches!(err, ProxyError::Busy { ref backend, .. } if backend == "b0"));
        let snap = fx.backend("b0").snapshot();
        assert_eq!(snap.busy_count_total, 1);
        assert_eq!(snap.fail_count_total, 0);
        assert_eq!(snap.state, HealthState::Active);
        assert_eq!(fx.pool.log(), vec!["open b0", "close b0"]);
    }

    #[tokio::test]
    async fn test_open_busy_is_busy() {
        let fx = Fixture::new(2);
        fx.pool.script("b0", Script::OpenBusy);
        let mut res = BufferedResponse::new();

        let err = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap_err();
        assert_eq!(
            err,
            ProxyError::Busy {
                backend: "b0".into(),
                message: "no capacity".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_backend_recovers_through_probe() {
        let fx = Fixture::new(1);
        fx.pool.script("b0", Script::OpenFail);
        let mut res = BufferedResponse::new();
        assert!(fx.controller.proxy(&request(Method::GET), &mut res).await.is_err());
        assert_eq!(fx.backend("b0").state(), HealthState::Fail);

        // inside the backoff window nothing is tried
        let err = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap_err();
        assert_eq!(err, ProxyError::NoBackendAvailable);

        fx.clock.advance(2_000);
        fx.pool.script("b0", Script::Ok);
        let mut res = BufferedResponse::new();
        let report = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap();

        assert_eq!(report.backend, "b0");
        assert_eq!(fx.backend("b0").state(), HealthState::Active);
        assert_eq!(fx.backend("b0").health.dynamic_recover_timeout(), 1_000);
    }

    #[tokio::test]
    async fn test_post_prefers_healthy_backend() {
        let fx = Fixture::build(2, FailoverPolicy::default(), Strategy::Adaptive);
        fx.backend("b1").on_fail();
        fx.clock.advance(2_000);
        fx.pool.script("b1", Script::OpenFail);
        let mut res = BufferedResponse::new();

        let report = fx.controller.proxy(&request(Method::POST), &mut res).await.unwrap();

        assert_eq!(report, ProxyReport { backend: "b0".into(), failed_over: false });
        assert_eq!(fx.pool.log(), vec!["open b0", "close b0"]);
        assert_eq!(fx.fails("b1"), 1);
    }

    #[tokio::test]
    async fn test_get_tries_recovering_backend_then_fails_over() {
        let fx = Fixture::build(2, FailoverPolicy::default(), Strategy::Adaptive);
        fx.backend("b1").on_fail();
        fx.clock.advance(2_000);
        fx.pool.script("b1", Script::OpenFail);
        let mut res = BufferedResponse::new();

        let report = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap();

        assert_eq!(report, ProxyReport { backend: "b0".into(), failed_over: true });
        assert_eq!(fx.pool.log(), vec!["open b1", "purge b1", "open b0", "close b0"]);
        assert_eq!(fx.fails("b1"), 2);
        assert_eq!(fx.backend("b1").health.dynamic_recover_timeout(), 3_000);
    }

    #[tokio::test]
    async fn test_stale_idle_connection_retried_fresh() {
        let fx = Fixture::new(2);
        fx.pool.script("b0", Script::StaleIdle);
        let mut res = BufferedResponse::new();

        let report = fx.controller.proxy(&request(Method::POST), &mut res).await.unwrap();

        assert_eq!(report, ProxyReport { backend: "b0".into(), failed_over: false });
        assert_eq!(res.body, b"b0");
        assert_eq!(fx.pool.log(), vec!["open b0", "close b0", "open_new b0", "close b0"]);

        let snap = fx.backend("b0").snapshot();
        assert_eq!(snap.state, HealthState::Active);
        assert_eq!(snap.fail_count_total, 0);
        assert_eq!(snap.keepalive_count_total, 1);
        assert_eq!(snap.connect_count_total, 1);
        assert_eq!(fx.backend("b0").health.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_idle_then_refused_counts_once() {
        let fx = Fixture::new(2);
        fx.pool.script("b0", Script::StaleIdleDown);
        let mut res = BufferedResponse::new();

        let report = fx.controller.proxy(&request(Method::GET), &mut res).await.unwrap();

        assert_eq!(report.backend, "b1");
        assert_eq!(fx.fails("b0"), 1);
        assert_eq!(fx.backend("b0").state(), HealthState::Fail);
    }

    #[tokio::test]
    async fn test_idle_failure_after_head_not_retried() {
        let fx = Fixture::new(2);
        fx.pool.script("b0", Script::IdleFailMidResponse);
        let mut res = BufferedResponse::new();

        let err = fx.controller.proxy(&request(Method::POST), &mut res).await.unwrap_err();

        assert!(matches!(err, ProxyError::NonIdempotentFailure { ref backend, .. } if backend == "b0"));
        assert_eq!(fx.pool.log(), vec!["open b0", "close b0", "purge b0"]);
        assert_eq!(fx.fails("b0"), 1);
    }
}
