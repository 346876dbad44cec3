//! Azure DevOps Test Plans client.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create run | `POST test/runs` |
//! | list child suites | `GET testplan/Plans/{plan}/suites/{parent}?expand=children` |
//! | create suite | `POST testplan/Plans/{plan}/suites` |
//! | list suite cases | `GET testplan/Plans/{plan}/Suites/{suite}/TestCase` |
//! | create case | `POST wit/workitems/$Test%20Case`, then `POST test/Plans/{plan}/suites/{suite}/testcases/{id}` |
//! | set steps, link issue | `PATCH wit/workitems/{id}` (JSON Patch) |
//! | read links | `GET wit/workitems/{id}?$expand=relations` |
//! | test point | `GET test/Plans/{plan}/Suites/{suite}/Points?testCaseId={id}` |
//! | publish | `POST test/Runs/{run}/Results` |
//! | complete | `PATCH test/Runs/{run}` |

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::http::api_root;
use super::steps::{STEPS_FIELD, steps_xml};
use super::{
    ApiRequest, CaseResult, NamedRef, RemoteCaller, RemoteError, RemoteResult, TestManagementApi,
    Transport,
};
use crate::config::RemoteSettings;

/// Relation type linking a test case to the work item it tests.
pub const TESTED_BY: &str = "Microsoft.VSTS.Common.TestedBy-Reverse";

/// [`TestManagementApi`] backed by the Azure DevOps REST API.
pub struct DevOpsClient<T> {
    caller: RemoteCaller<T>,
    plan_id: u64,
    work_item_url: String,
    test_case_fields: BTreeMap<String, String>,
}

impl<T: Transport> DevOpsClient<T> {
    pub fn new(caller: RemoteCaller<T>, settings: &RemoteSettings) -> Self {
        Self {
            caller,
            plan_id: settings.test_plan_id,
            work_item_url: format!("{}wit/workItems/", api_root(settings)),
            test_case_fields: settings.test_case_fields.clone(),
        }
    }

    async fn send(&self, request: ApiRequest) -> RemoteResult<(ApiRequest, Value)> {
        let value = self.caller.send(&request).await?;
        Ok((request, value))
    }

    async fn create_work_item(&self, title: &str) -> RemoteResult<u64> {
        let mut patch = vec![json!({"op": "add", "path": "/fields/System.Title", "value": title})];
        patch.extend(self.test_case_fields.iter().map(|(field, value)| {
            json!({"op": "add", "path": format!("/fields/{}", field), "value": value})
        }));

        let (request, response) = self
            .send(ApiRequest::post("wit/workitems/$Test%20Case").json_patch(Value::Array(patch)))
            .await?;
        id_of(&request, &response)
    }
}

#[async_trait]
impl<T: Transport> TestManagementApi for DevOpsClient<T> {
    async fn create_run(&self, name: &str) -> RemoteResult<u64> {
        let body = json!({
            "name": name,
            "plan": {"id": self.plan_id.to_string()},
            "automated": true
        });
        let (request, response) = self.send(ApiRequest::post("test/runs").json(body)).await?;
        id_of(&request, &response)
    }

    async fn child_suites(&self, parent_suite: u64) -> RemoteResult<Vec<NamedRef>> {
        let path = format!(
            "testplan/Plans/{}/suites/{}?expand=children",
            self.plan_id, parent_suite
        );
        let (request, response) = self.send(ApiRequest::get(path)).await?;

        // A parent without children omits the key entirely.
        let children = match response.get("children") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(children) => children,
        };
        entries(&request, children)?
            .iter()
            .map(|child| named_ref(&request, child))
            .collect()
    }

    async fn create_suite(&self, parent_suite: u64, name: &str) -> RemoteResult<u64> {
        let body = json!({
            "suiteType": "StaticTestSuite",
            "name": name,
            "parentSuite": {"id": parent_suite}
        });
        let path = format!("testplan/Plans/{}/suites", self.plan_id);
        let (request, response) = self.send(ApiRequest::post(path).json(body)).await?;
        id_of(&request, &response)
    }

    async fn suite_test_cases(&self, suite: u64) -> RemoteResult<Vec<NamedRef>> {
        let path = format!(
            "testplan/Plans/{}/Suites/{}/TestCase?excludeFlags=3&witFields=System.WorkItemType%2CSystem.Title",
            self.plan_id, suite
        );
        let (request, response) = self.send(ApiRequest::get(path)).await?;

        let value = response.get("value").unwrap_or(&Value::Null);
        if value.is_null() {
            return Ok(Vec::new());
        }
        entries(&request, value)?
            .iter()
            .map(|entry| {
                let work_item = entry
                    .get("workItem")
                    .ok_or_else(|| unexpected(&request, "test case entry without `workItem`"))?;
                named_ref(&request, work_item)
            })
            .collect()
    }

    async fn create_test_case(&self, suite: u64, title: &str) -> RemoteResult<u64> {
        let id = self.create_work_item(title).await?;
        let path = format!(
            "test/Plans/{}/suites/{}/testcases/{}",
            self.plan_id, suite, id
        );
        self.send(ApiRequest::post(path)).await?;
        debug!("Created test case {} ({}) in suite {}", id, title, suite);
        Ok(id)
    }

    async fn set_test_steps(&self, test_case: u64, steps: &[String]) -> RemoteResult<()> {
        let xml = steps_xml(steps).map_err(|e| RemoteError::Encode {
            what: "test steps",
            reason: e.to_string(),
        })?;
        let patch = json!([{
            "op": "replace",
            "path": format!("/fields/{}", STEPS_FIELD),
            "value": xml
        }]);
        self.send(ApiRequest::patch(format!("wit/workitems/{}", test_case)).json_patch(patch))
            .await?;
        Ok(())
    }

    async fn linked_issues(&self, test_case: u64) -> RemoteResult<BTreeSet<String>> {
        let path = format!("wit/workitems/{}?$expand=relations", test_case);
        let (_, response) = self.send(ApiRequest::get(path)).await?;

        let relations = response
            .get("relations")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(relations
            .iter()
            .filter(|r| r.get("rel").and_then(Value::as_str) == Some(TESTED_BY))
            .filter_map(|r| r.get("url").and_then(Value::as_str))
            .filter_map(|url| url.rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn link_issue(&self, test_case: u64, issue: &str) -> RemoteResult<()> {
        let patch = json!([{
            "op": "add",
            "path": "/relations/-",
            "value": {
                "rel": TESTED_BY,
                "url": format!("{}{}", self.work_item_url, issue)
            }
        }]);
        self.send(ApiRequest::patch(format!("wit/workitems/{}", test_case)).json_patch(patch))
            .await?;
        Ok(())
    }

    async fn test_point(&self, suite: u64, test_case: u64) -> RemoteResult<Option<u64>> {
        let path = format!(
            "test/Plans/{}/Suites/{}/Points?testCaseId={}",
            self.plan_id, suite, test_case
        );
        let (request, response) = self.send(ApiRequest::get(path)).await?;

        match response.get("value").and_then(Value::as_array).and_then(|v| v.first()) {
            None => Ok(None),
            Some(point) => id_of(&request, point).map(Some),
        }
    }

    async fn publish_results(&self, run: u64, results: &[CaseResult]) -> RemoteResult<()> {
        let body = serde_json::to_value(results).map_err(|e| RemoteError::Encode {
            what: "run results",
            reason: e.to_string(),
        })?;
        self.send(ApiRequest::post(format!("test/Runs/{}/Results", run)).json(body))
            .await?;
        Ok(())
    }

    async fn complete_run(&self, run: u64) -> RemoteResult<()> {
        let body = json!({"state": "Completed"});
        self.send(ApiRequest::patch(format!("test/Runs/{}", run)).json(body))
            .await?;
        Ok(())
    }
}

fn unexpected(request: &ApiRequest, reason: impl Into<String>) -> RemoteError {
    RemoteError::UnexpectedResponse {
        method: request.method,
        path: request.path.clone(),
        reason: reason.into(),
    }
}

/// IDs arrive as numbers from most endpoints and as strings from some.
fn as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn id_of(request: &ApiRequest, value: &Value) -> RemoteResult<u64> {
    value
        .get("id")
        .and_then(as_id)
        .ok_or_else(|| unexpected(request, "missing numeric `id`"))
}

fn entries<'a>(request: &ApiRequest, value: &'a Value) -> RemoteResult<&'a [Value]> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| unexpected(request, "expected an array"))
}

fn named_ref(request: &ApiRequest, value: &Value) -> RemoteResult<NamedRef> {
    let id = id_of(request, value)?;
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| unexpected(request, format!("entry {} without `name`", id)))?;
    Ok(NamedRef::new(id, name))
}
