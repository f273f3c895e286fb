//! In-process fake of the upstream services.
//!
//! Responses are generated from a small in-memory world (affiliations and
//! per-researcher records). Individual URLs can be scripted with one-off
//! replies that take precedence over the generated ones.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use orcid_sync::api::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use orcid_sync::RecordKind;

pub const TOKEN_URL: &str = "https://orcid.test/oauth/token";
pub const MEMBER_URL: &str = "https://api.orcid.test/v3.0/";
pub const SEARCH_URL: &str = "https://pub.orcid.test/v3.0/";
pub const ROR_URL: &str = "https://ror.test/organizations";

/// One record as listed in a researcher's summary.
#[derive(Debug, Clone)]
pub struct FakeRecord {
    pub put_code: u64,
    pub last_modified: i64,
    pub title: String,
}

impl FakeRecord {
    pub fn new(put_code: u64, last_modified: i64, title: &str) -> Self {
        Self {
            put_code,
            last_modified,
            title: title.to_string(),
        }
    }
}

/// Names and affiliation sources served from `/{orcid}/record`.
#[derive(Debug, Clone, Default)]
pub struct FakeProfile {
    pub given_names: String,
    pub family_name: String,
    pub credit_name: Option<String>,
    /// Source client id of each employment entry; `None` for self-asserted.
    pub employment_sources: Vec<Option<String>>,
}

impl FakeProfile {
    pub fn new(given_names: &str, family_name: &str) -> Self {
        Self {
            given_names: given_names.to_string(),
            family_name: family_name.to_string(),
            ..Default::default()
        }
    }

    pub fn credit(mut self, credit_name: &str) -> Self {
        self.credit_name = Some(credit_name.to_string());
        self
    }

    pub fn employment_by(mut self, client_id: Option<&str>) -> Self {
        self.employment_sources.push(client_id.map(str::to_string));
        self
    }
}

#[derive(Default)]
struct World {
    affiliations: HashMap<String, Vec<String>>,
    profiles: HashMap<String, FakeProfile>,
    records: HashMap<(String, RecordKind), Vec<FakeRecord>>,
    grid_ids: HashMap<String, String>,
    scripted: HashMap<String, VecDeque<Result<HttpResponse, TransportError>>>,
    /// Token requests answered successfully before the endpoint starts failing.
    token_budget: Option<usize>,
    tokens_issued: usize,
    requests: Vec<HttpRequest>,
}

#[derive(Default)]
pub struct FakeOrcid {
    world: Mutex<World>,
    search_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeOrcid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn affiliate(&self, ror_id: &str, researchers: &[&str]) {
        let ids = researchers.iter().map(|r| r.to_string()).collect();
        self.world().affiliations.insert(ror_id.to_string(), ids);
    }

    pub fn affiliate_many(&self, ror_id: &str, researchers: Vec<String>) {
        self.world().affiliations.insert(ror_id.to_string(), researchers);
    }

    pub fn set_records(&self, researcher: &str, kind: RecordKind, records: Vec<FakeRecord>) {
        self.world()
            .records
            .insert((researcher.to_string(), kind), records);
    }

    pub fn set_profile(&self, researcher: &str, profile: FakeProfile) {
        self.world()
            .profiles
            .insert(researcher.to_string(), profile);
    }

    pub fn set_grid_id(&self, ror_id: &str, grid_id: &str) {
        self.world()
            .grid_ids
            .insert(ror_id.to_string(), grid_id.to_string());
    }

    /// Queues a reply for the next request to `url`.
    pub fn script(&self, url: &str, reply: Result<HttpResponse, TransportError>) {
        self.world()
            .scripted
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    /// After `issued` successful token responses the token endpoint answers 401.
    pub fn fail_tokens_after(&self, issued: usize) {
        self.world().token_budget = Some(issued);
    }

    /// Holds every search request until `release_search` is called.
    pub fn gate_search(&self) {
        *self.search_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_search(&self) {
        if let Some(gate) = self.search_gate.lock().unwrap().take() {
            gate.add_permits(1024);
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.world().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.world().requests.clear();
    }

    pub fn count_requests(&self, pred: impl Fn(&HttpRequest) -> bool) -> usize {
        self.world().requests.iter().filter(|r| pred(r)).count()
    }

    pub fn search_requests(&self) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| is_search(&r.url))
            .collect()
    }

    /// Detail fetches (`/{orcid}/work/{put-code}` and `/{orcid}/funding/{put-code}`).
    pub fn detail_requests(&self) -> usize {
        self.count_requests(|r| member_path(&r.url).is_some_and(|p| p.len() == 3))
    }

    pub fn summary_url(researcher: &str, kind: RecordKind) -> String {
        format!("{}{}/{}", MEMBER_URL, researcher, kind.summary_path())
    }

    pub fn detail_url(researcher: &str, kind: RecordKind, put_code: u64) -> String {
        format!("{}{}/{}/{}", MEMBER_URL, researcher, kind.detail_path(), put_code)
    }

    pub fn record_url(researcher: &str) -> String {
        format!("{}{}/record", MEMBER_URL, researcher)
    }

    pub fn record_requests(&self) -> usize {
        self.count_requests(|r| r.url.starts_with(MEMBER_URL) && r.url.ends_with("/record"))
    }

    fn world(&self) -> std::sync::MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }

    fn respond(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut world = self.world();
        world.requests.push(request.clone());

        if let Some(reply) = world
            .scripted
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }

        if request.url == TOKEN_URL {
            if world.token_budget.is_some_and(|budget| world.tokens_issued >= budget) {
                return Ok(HttpResponse::json(
                    401,
                    &json!({"error": "invalid_client", "error_description": "Client not found"}),
                ));
            }
            world.tokens_issued += 1;
            return Ok(HttpResponse::json(
                200,
                &json!({
                    "access_token": format!("token-{}", world.tokens_issued),
                    "token_type": "bearer",
                    "expires_in": 3600,
                    "scope": "/read-public"
                }),
            ));
        }

        if is_search(&request.url) {
            return Ok(search_page(&world, request));
        }

        if let Some(ror) = request.url.strip_prefix(ROR_URL) {
            let ror = ror.trim_matches('/');
            return Ok(match world.grid_ids.get(ror) {
                Some(grid) => HttpResponse::json(
                    200,
                    &json!({
                        "id": format!("https://ror.org/{}", ror),
                        "external_ids": [{"type": "grid", "all": [grid], "preferred": grid}]
                    }),
                ),
                None => HttpResponse::new(404, "not found"),
            });
        }

        if let Some(parts) = member_path(&request.url) {
            return Ok(member_document(&world, &parts));
        }

        Ok(HttpResponse::new(404, "no such endpoint"))
    }
}

#[async_trait]
impl HttpTransport for FakeOrcid {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if is_search(&request.url) {
            let gate = self.search_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| TransportError::Other(e.to_string()))?;
            }
        }
        self.respond(&request)
    }
}

fn is_search(url: &str) -> bool {
    url.starts_with(SEARCH_URL) && url.ends_with("expanded-search/")
}

fn member_path(url: &str) -> Option<Vec<String>> {
    let path = url.strip_prefix(MEMBER_URL)?;
    Some(path.split('/').map(str::to_string).collect())
}

/// Extracts the ROR id from `ror-org-id:"https://ror.org/{ror}" OR ...`.
fn queried_ror(query: &str) -> Option<&str> {
    let rest = query.split("ror-org-id:\"https://ror.org/").nth(1)?;
    rest.split('"').next()
}

fn search_page(world: &World, request: &HttpRequest) -> HttpResponse {
    let ids = request
        .query_param("q")
        .and_then(queried_ror)
        .and_then(|ror| world.affiliations.get(ror))
        .cloned()
        .unwrap_or_default();
    let start: usize = request
        .query_param("start")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let rows: usize = request
        .query_param("rows")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    let page: Vec<Value> = ids
        .iter()
        .skip(start)
        .take(rows)
        .map(|id| json!({"orcid-id": id, "given-names": "Test", "family-names": "Researcher"}))
        .collect();

    HttpResponse::json(200, &json!({"num-found": ids.len(), "expanded-result": page}))
}

fn member_document(world: &World, parts: &[String]) -> HttpResponse {
    match parts {
        [researcher, section] if section == "record" => match world.profiles.get(researcher) {
            Some(profile) => HttpResponse::json(200, &record_document(profile)),
            None => HttpResponse::new(404, "unknown researcher"),
        },
        [researcher, section] => {
            let Ok(kind) = section.parse::<RecordKind>() else {
                return HttpResponse::new(404, "unknown section");
            };
            let Some(records) = world.records.get(&(researcher.clone(), kind)) else {
                return HttpResponse::new(404, "unknown researcher");
            };
            let key = kind.summary_key();
            let groups: Vec<Value> = records
                .iter()
                .map(|r| {
                    let mut group = serde_json::Map::new();
                    group.insert(
                        key.to_string(),
                        json!([{
                            "put-code": r.put_code,
                            "last-modified-date": {"value": r.last_modified}
                        }]),
                    );
                    Value::Object(group)
                })
                .collect();
            HttpResponse::json(200, &json!({"group": groups}))
        }
        [researcher, section, put_code] => {
            let kind = match section.as_str() {
                "work" => RecordKind::Work,
                "funding" => RecordKind::Funding,
                _ => return HttpResponse::new(404, "unknown section"),
            };
            let record = world
                .records
                .get(&(researcher.clone(), kind))
                .and_then(|records| {
                    records
                        .iter()
                        .find(|r| r.put_code.to_string() == *put_code)
                });
            match record {
                Some(record) => HttpResponse::json(200, &detail_document(kind, record)),
                None => HttpResponse::new(404, "unknown put-code"),
            }
        }
        _ => HttpResponse::new(404, "unknown path"),
    }
}

fn record_document(profile: &FakeProfile) -> Value {
    let employments: Vec<Value> = profile
        .employment_sources
        .iter()
        .map(|client| {
            let source = match client {
                Some(id) => json!({
                    "source-client-id": {"path": id, "host": "orcid.org"},
                    "source-name": {"value": "Affiliation Manager"}
                }),
                None => json!({"source-name": {"value": profile.given_names}}),
            };
            json!({"summaries": [{"employment-summary": {
                "department-name": "Research",
                "source": source
            }}]})
        })
        .collect();

    json!({
        "person": {"name": {
            "given-names": {"value": profile.given_names},
            "family-name": {"value": profile.family_name},
            "credit-name": profile.credit_name.as_ref().map(|c| json!({"value": c}))
        }},
        "activities-summary": {
            "employments": {"affiliation-group": employments},
            "educations": {"affiliation-group": []}
        }
    })
}

fn detail_document(kind: RecordKind, record: &FakeRecord) -> Value {
    match kind {
        RecordKind::Work => json!({
            "put-code": record.put_code,
            "last-modified-date": {"value": record.last_modified},
            "title": {"title": {"value": record.title}},
            "type": "journal-article",
            "publication-date": {"year": {"value": "2022"}, "month": {"value": "05"}},
            "external-ids": {"external-id": [
                {"external-id-type": "doi", "external-id-value": format!("10.5555/{}", record.put_code)}
            ]},
            "source": {"source-name": {"value": "Crossref"}},
            "visibility": "public"
        }),
        RecordKind::Funding => json!({
            "put-code": record.put_code,
            "last-modified-date": {"value": record.last_modified},
            "title": {"title": {"value": record.title}},
            "type": "grant",
            "organization": {"name": "Research Council", "address": {"city": "Oslo", "country": "NO"}},
            "start-date": {"year": {"value": "2020"}},
            "source": {"source-name": {"value": "Test Researcher"}},
            "visibility": "public"
        }),
    }
}
