//! Test doubles for the remote layers.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::remote::{
    ApiRequest, CaseResult, Method, NamedRef, RemoteError, RemoteResult, TestManagementApi,
    Transport, TransportError,
};

#[derive(Default)]
struct Script {
    responses: VecDeque<Result<Value, TransportError>>,
    fallback: Option<Result<Value, TransportError>>,
    requests: Vec<ApiRequest>,
}

/// Transport answering from a fixed script and recording every request.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    first_delay: Option<Duration>,
}

impl ScriptedTransport {
    /// Answers with `responses` in order.
    pub fn new(responses: Vec<Result<Value, TransportError>>) -> Self {
        let script = Script {
            responses: responses.into(),
            ..Default::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
            first_delay: None,
        }
    }

    /// Answers every request the same way.
    pub fn always(response: Result<Value, TransportError>) -> Self {
        let script = Script {
            fallback: Some(response),
            ..Default::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
            first_delay: None,
        }
    }

    /// Delays the answer to the first request.
    pub fn with_delay_on_first(mut self, delay: Duration) -> Self {
        self.first_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().requests.len()
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.script.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value, TransportError> {
        let (response, first) = {
            let mut script = self.script.lock().unwrap();
            script.requests.push(request.clone());
            let first = script.requests.len() == 1;
            let response = script
                .responses
                .pop_front()
                .or_else(|| script.fallback.clone())
                .unwrap_or_else(|| {
                    Err(TransportError::Rejected {
                        status: 404,
                        message: format!("no scripted response for {}", request.path),
                    })
                });
            (response, first)
        };
        if first && let Some(delay) = self.first_delay {
            tokio::time::sleep(delay).await;
        }
        response
    }
}

#[derive(Debug, Default)]
struct Store {
    next_id: u64,
    suites: Vec<(u64, u64, String)>,
    cases: Vec<(u64, u64, String)>,
    steps: BTreeMap<u64, Vec<String>>,
    links: BTreeMap<u64, BTreeSet<String>>,
    runs: Vec<(u64, String)>,
    published: Vec<(u64, Vec<CaseResult>)>,
    completed: Vec<u64>,
    calls: Vec<&'static str>,
}

/// In-memory test-management system.
///
/// Every operation yields to the scheduler first so concurrent callers
/// interleave the way they would against a real service.
#[derive(Default)]
pub struct InMemoryApi {
    store: Mutex<Store>,
    fail_on: Option<&'static str>,
    slow: Option<(&'static str, Duration)>,
    without_points: bool,
}

impl InMemoryApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.store.lock().unwrap().next_id = 100;
        api
    }

    /// Fails every call of the named operation with a rejection.
    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.fail_on = Some(operation);
        self
    }

    /// Delays every call of the named operation.
    pub fn with_slow_operation(mut self, operation: &'static str, delay: Duration) -> Self {
        self.slow = Some((operation, delay));
        self
    }

    /// Test points are never found.
    pub fn without_test_points(mut self) -> Self {
        self.without_points = true;
        self
    }

    pub fn with_suite(self, parent: u64, name: &str) -> Self {
        {
            let mut store = self.store.lock().unwrap();
            let id = next_id(&mut store);
            store.suites.push((id, parent, name.to_string()));
        }
        self
    }

    pub fn with_case(self, suite: u64, title: &str) -> Self {
        {
            let mut store = self.store.lock().unwrap();
            let id = next_id(&mut store);
            store.cases.push((id, suite, title.to_string()));
        }
        self
    }

    pub fn with_link(self, case: u64, issue: &str) -> Self {
        self.store
            .lock()
            .unwrap()
            .links
            .entry(case)
            .or_default()
            .insert(issue.to_string());
        self
    }

    pub fn suite_id(&self, name: &str) -> Option<u64> {
        let store = self.store.lock().unwrap();
        store.suites.iter().find(|(_, _, n)| n == name).map(|(id, _, _)| *id)
    }

    pub fn case_id(&self, title: &str) -> Option<u64> {
        let store = self.store.lock().unwrap();
        store.cases.iter().find(|(_, _, t)| t == title).map(|(id, _, _)| *id)
    }

    /// Number of calls of the named operation.
    pub fn count(&self, operation: &str) -> usize {
        self.store.lock().unwrap().calls.iter().filter(|c| **c == operation).count()
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.store.lock().unwrap().calls.clone()
    }

    pub fn published(&self) -> Vec<(u64, Vec<CaseResult>)> {
        self.store.lock().unwrap().published.clone()
    }

    pub fn run_names(&self) -> Vec<String> {
        let store = self.store.lock().unwrap();
        store.runs.iter().map(|(_, name)| name.clone()).collect()
    }

    pub fn completed(&self) -> Vec<u64> {
        self.store.lock().unwrap().completed.clone()
    }

    pub fn steps(&self, case: u64) -> Option<Vec<String>> {
        self.store.lock().unwrap().steps.get(&case).cloned()
    }

    pub fn links(&self, case: u64) -> BTreeSet<String> {
        self.store.lock().unwrap().links.get(&case).cloned().unwrap_or_default()
    }

    async fn enter(&self, operation: &'static str) -> RemoteResult<()> {
        tokio::task::yield_now().await;
        self.store.lock().unwrap().calls.push(operation);
        if let Some((slow, delay)) = self.slow
            && slow == operation
        {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on == Some(operation) {
            return Err(RemoteError::Rejected {
                method: Method::Post,
                path: operation.to_string(),
                body: None,
                source: TransportError::Rejected {
                    status: 400,
                    message: "injected failure".into(),
                },
            });
        }
        Ok(())
    }
}

fn next_id(store: &mut Store) -> u64 {
    store.next_id += 1;
    store.next_id
}

#[async_trait]
impl TestManagementApi for InMemoryApi {
    async fn create_run(&self, name: &str) -> RemoteResult<u64> {
        self.enter("create_run").await?;
        let mut store = self.store.lock().unwrap();
        let id = next_id(&mut store);
        store.runs.push((id, name.to_string()));
        Ok(id)
    }

    async fn child_suites(&self, parent_suite: u64) -> RemoteResult<Vec<NamedRef>> {
        self.enter("child_suites").await?;
        let store = self.store.lock().unwrap();
        Ok(store
            .suites
            .iter()
            .filter(|(_, parent, _)| *parent == parent_suite)
            .map(|(id, _, name)| NamedRef::new(*id, name.clone()))
            .collect())
    }

    async fn create_suite(&self, parent_suite: u64, name: &str) -> RemoteResult<u64> {
        self.enter("create_suite").await?;
        let mut store = self.store.lock().unwrap();
        let id = next_id(&mut store);
        store.suites.push((id, parent_suite, name.to_string()));
        Ok(id)
    }

    async fn suite_test_cases(&self, suite: u64) -> RemoteResult<Vec<NamedRef>> {
        self.enter("suite_test_cases").await?;
        let store = self.store.lock().unwrap();
        Ok(store
            .cases
            .iter()
            .filter(|(_, s, _)| *s == suite)
            .map(|(id, _, title)| NamedRef::new(*id, title.clone()))
            .collect())
    }

    async fn create_test_case(&self, suite: u64, title: &str) -> RemoteResult<u64> {
        self.enter("create_test_case").await?;
        let mut store = self.store.lock().unwrap();
        let id = next_id(&mut store);
        store.cases.push((id, suite, title.to_string()));
        Ok(id)
    }

    async fn set_test_steps(&self, test_case: u64, steps: &[String]) -> RemoteResult<()> {
        self.enter("set_test_steps").await?;
        self.store.lock().unwrap().steps.insert(test_case, steps.to_vec());
        Ok(())
    }

    async fn linked_issues(&self, test_case: u64) -> RemoteResult<BTreeSet<String>> {
        self.enter("linked_issues").await?;
        Ok(self.links(test_case))
    }

    async fn link_issue(&self, test_case: u64, issue: &str) -> RemoteResult<()> {
        self.enter("link_issue").await?;
        self.store
            .lock()
            .unwrap()
            .links
            .entry(test_case)
            .or_default()
            .insert(issue.to_string());
        Ok(())
    }

    async fn test_point(&self, suite: u64, test_case: u64) -> RemoteResult<Option<u64>> {
        self.enter("test_point").await?;
        if self.without_points {
            return Ok(None);
        }
        let store = self.store.lock().unwrap();
        Ok(store
            .cases
            .iter()
            .find(|(id, s, _)| *id == test_case && *s == suite)
            .map(|(id, _, _)| id + 10_000))
    }

    async fn publish_results(&self, run: u64, results: &[CaseResult]) -> RemoteResult<()> {
        self.enter("publish_results").await?;
        self.store.lock().unwrap().published.push((run, results.to_vec()));
        Ok(())
    }

    async fn complete_run(&self, run: u64) -> RemoteResult<()> {
        self.enter("complete_run").await?;
        self.store.lock().unwrap().completed.push(run);
        Ok(())
    }
}
