//! Per-object release units.
//!
//! The coordinator reads each source payload and decides whether the object
//! takes part; a unit then shapes the payload for the target and performs the
//! remote calls. Units only see immutable snapshots and report back through
//! [`Outcome`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use prd_adapters::source::{SideChannel, SourceObject};
use prd_adapters::store::{ObjectStore, StoreResult, object_id};
use prd_mapping::MappingNode;
use prd_override::FieldPath;
use prd_primitives::{ObjectId, ObjectKind, extract_id_from_url};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::phase::Phase;
use crate::report::UnitFailure;
use crate::state::PairTable;

/// Queue attributes that never travel to the target.
const QUEUE_STRIPPED_FIELDS: [&str; 2] = ["counts", "inbox"];
/// Queue attributes holding a single object URL.
const QUEUE_SINGLE_REFERENCES: [&str; 2] = ["workspace", "schema"];
/// Queue attributes holding lists of object URLs.
const QUEUE_LIST_REFERENCES: [&str; 2] = ["hooks", "webhooks"];
/// Fields sent when instantiating a hook from a template in another organization.
const TEMPLATE_CREATE_FIELDS: [&str; 4] = ["name", "hook_template", "token_owner", "events"];

/// Run-wide values every unit needs.
#[derive(Debug, Clone)]
pub(crate) struct UnitSettings {
    pub same_organization: bool,
    pub token_owner_url: Option<String>,
    pub organization_url: String,
}

/// Shared handles passed into every unit.
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub target: Arc<dyn ObjectStore>,
    pub source_store: Option<Arc<dyn ObjectStore>>,
    pub settings: Arc<UnitSettings>,
}

/// Everything one unit needs to release one object.
#[derive(Debug)]
pub(crate) struct UnitInput {
    pub kind: ObjectKind,
    pub source_id: ObjectId,
    pub target: Option<ObjectId>,
    pub source: SourceObject,
    pub private_url: Option<String>,
    pub inbox: Option<Box<UnitInput>>,
}

impl UnitInput {
    pub(crate) fn new(node: &MappingNode, source: SourceObject) -> Self {
        Self {
            kind: source.kind,
            source_id: node.id,
            target: node.target_object,
            source,
            private_url: None,
            inbox: None,
        }
    }
}

/// Result of one object within a unit.
#[derive(Debug)]
pub(crate) enum Outcome {
    Released {
        kind: ObjectKind,
        source_id: ObjectId,
        record: Value,
        created: bool,
    },
    Failed(UnitFailure),
}

/// Releases one object (and, for queues, its inbox).
pub(crate) async fn run_unit(
    collaborators: Collaborators,
    pairs: Arc<PairTable>,
    phase: Phase,
    mut input: UnitInput,
) -> Vec<Outcome> {
    let inbox = input.inbox.take();
    let (kind, source_id) = (input.kind, input.source_id);
    let mut outcomes = Vec::with_capacity(2);

    let payload = match kind {
        ObjectKind::Schema => prepare_schema(input.source),
        ObjectKind::Hook => {
            prepare_hook(input.source, &collaborators.settings, input.private_url)
        }
        ObjectKind::Workspace => {
            prepare_workspace(input.source.payload, &collaborators.settings.organization_url)
        }
        ObjectKind::Queue => prepare_queue(input.source.payload, &pairs),
        ObjectKind::Organization
        | ObjectKind::HookTemplate
        | ObjectKind::Inbox
        | ObjectKind::User => {
            outcomes.push(Outcome::Failed(UnitFailure::new(
                phase,
                kind,
                source_id,
                "object kind is not released by a standalone unit",
            )));
            return outcomes;
        }
    };

    let result = if kind == ObjectKind::Hook {
        release_hook(&collaborators, input.target, payload).await
    } else {
        upsert(collaborators.target.as_ref(), kind, input.target, &payload).await
    };

    match result {
        Ok((record, created)) => {
            debug!(%kind, %source_id, target_id = ?record.get("id"), created, "object released");
            if let Some(inbox) = inbox {
                let queue_url = record_url(collaborators.target.as_ref(), kind, &record);
                outcomes.push(release_inbox(&collaborators, phase, *inbox, queue_url).await);
            }
            outcomes.insert(
                0,
                Outcome::Released {
                    kind,
                    source_id,
                    record,
                    created,
                },
            );
        }
        Err(err) => {
            warn!(%kind, %source_id, error = %err, "object release failed");
            outcomes.push(Outcome::Failed(UnitFailure::new(phase, kind, source_id, &err)));
            if let Some(inbox) = inbox {
                outcomes.push(Outcome::Failed(UnitFailure::new(
                    phase,
                    ObjectKind::Inbox,
                    inbox.source_id,
                    format!("queue {source_id} was not released"),
                )));
            }
        }
    }
    outcomes
}

async fn release_inbox(
    collaborators: &Collaborators,
    phase: Phase,
    input: UnitInput,
    queue_url: Option<String>,
) -> Outcome {
    let payload = prepare_inbox(input.source.payload, queue_url);
    match upsert(
        collaborators.target.as_ref(),
        ObjectKind::Inbox,
        input.target,
        &payload,
    )
    .await
    {
        Ok((record, created)) => Outcome::Released {
            kind: ObjectKind::Inbox,
            source_id: input.source_id,
            record,
            created,
        },
        Err(err) => {
            warn!(source_id = %input.source_id, error = %err, "inbox release failed");
            Outcome::Failed(UnitFailure::new(
                phase,
                ObjectKind::Inbox,
                input.source_id,
                &err,
            ))
        }
    }
}

/// Creates the object when it has no target yet, otherwise updates it.
pub(crate) async fn upsert(
    store: &dyn ObjectStore,
    kind: ObjectKind,
    target: Option<ObjectId>,
    payload: &Value,
) -> StoreResult<(Value, bool)> {
    match target {
        Some(id) => store.update(kind, id, payload).await.map(|record| (record, false)),
        None => store.create(kind, payload).await.map(|record| (record, true)),
    }
}

fn record_url(store: &dyn ObjectStore, kind: ObjectKind, record: &Value) -> Option<String> {
    record
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| object_id(record).ok().map(|id| store.object_url(kind, id)))
}

async fn release_hook(
    collaborators: &Collaborators,
    target: Option<ObjectId>,
    mut payload: Value,
) -> StoreResult<(Value, bool)> {
    if let Some(id) = target {
        let record = collaborators
            .target
            .update(ObjectKind::Hook, id, &payload)
            .await?;
        return Ok((record, false));
    }
    if let Some(record) = create_from_template(collaborators, &mut payload).await? {
        return Ok((record, true));
    }
    let record = collaborators
        .target
        .create(ObjectKind::Hook, &payload)
        .await?;
    Ok((record, true))
}

/// Instantiates a new hook from its template, when it has one.
///
/// Returns `Ok(None)` when the hook should be created without a template:
/// it references none, or no target template with the same name exists.
async fn create_from_template(
    collaborators: &Collaborators,
    payload: &mut Value,
) -> StoreResult<Option<Value>> {
    let Some(template_url) = payload
        .get("hook_template")
        .and_then(Value::as_str)
        .map(str::to_owned)
    else {
        return Ok(None);
    };

    if collaborators.settings.same_organization {
        let mut request = payload.clone();
        if let Value::Object(map) = &mut request {
            map.remove("config");
        }
        return collaborators
            .target
            .create_from_template(&request)
            .await
            .map(Some);
    }

    let Some(source_store) = &collaborators.source_store else {
        warn!(template = %template_url, "no source store to resolve hook template; creating plain hook");
        return Ok(None);
    };
    let Some(template_id) = extract_id_from_url(&template_url) else {
        return Ok(None);
    };

    let source_template = source_store
        .get(ObjectKind::HookTemplate, template_id)
        .await?;
    let Some(name) = source_template.get("name").filter(|name| !name.is_null()) else {
        return Ok(None);
    };
    let candidates = collaborators
        .target
        .list_all(ObjectKind::HookTemplate)
        .await?;
    let Some(matched_url) = candidates
        .iter()
        .find(|candidate| candidate.get("name") == Some(name))
        .and_then(|candidate| candidate.get("url"))
        .and_then(Value::as_str)
    else {
        debug!(%name, "no hook template with the same name on target");
        return Ok(None);
    };

    if let Value::Object(map) = payload {
        map.insert(
            "hook_template".to_owned(),
            Value::String(matched_url.to_owned()),
        );
    }
    let mut request: Map<String, Value> = TEMPLATE_CREATE_FIELDS
        .iter()
        .filter_map(|field| {
            payload
                .get(*field)
                .map(|value| ((*field).to_owned(), value.clone()))
        })
        .collect();
    request.insert("queues".to_owned(), json!([]));

    let created = collaborators
        .target
        .create_from_template(&Value::Object(request))
        .await?;
    let id = object_id(&created)?;
    collaborators
        .target
        .update(ObjectKind::Hook, id, payload)
        .await
        .map(Some)
}

/// Keeps only the whitelisted organization attributes present on the source.
pub(crate) fn prepare_organization(source: &Value, fields: &[String]) -> Value {
    Value::Object(
        fields
            .iter()
            .filter_map(|field| source.get(field).map(|value| (field.clone(), value.clone())))
            .collect(),
    )
}

fn prepare_schema(source: SourceObject) -> Value {
    let SourceObject {
        mut payload,
        side_channel,
        ..
    } = source;
    if let Value::Object(map) = &mut payload {
        map.insert("queues".to_owned(), json!([]));
    }
    if let Some(SideChannel::FormulaFields(fields)) = side_channel {
        if let Some(content) = payload.get_mut("content") {
            let applied = apply_formulas(content, &fields);
            if applied < fields.len() {
                warn!(
                    applied,
                    available = fields.len(),
                    "some formula files match no schema datapoint"
                );
            }
        }
    }
    payload
}

/// Writes `formula` on every datapoint whose `id` has a formula file.
fn apply_formulas(node: &mut Value, fields: &BTreeMap<String, String>) -> usize {
    match node {
        Value::Array(items) => items
            .iter_mut()
            .map(|item| apply_formulas(item, fields))
            .sum(),
        Value::Object(map) => {
            let own = match map.get("id").and_then(Value::as_str).and_then(|id| fields.get(id)) {
                Some(code) => {
                    map.insert("formula".to_owned(), Value::String(code.clone()));
                    1
                }
                None => 0,
            };
            own + map
                .values_mut()
                .filter(|value| value.is_array() || value.is_object())
                .map(|value| apply_formulas(value, fields))
                .sum::<usize>()
        }
        _ => 0,
    }
}

fn prepare_hook(source: SourceObject, settings: &UnitSettings, private_url: Option<String>) -> Value {
    let SourceObject {
        mut payload,
        side_channel,
        ..
    } = source;
    if let Value::Object(map) = &mut payload {
        map.insert("run_after".to_owned(), json!([]));
        map.insert("queues".to_owned(), json!([]));
        if !settings.same_organization {
            if let Some(owner) = &settings.token_owner_url {
                map.insert("token_owner".to_owned(), Value::String(owner.clone()));
            }
        }
    }
    if let Some(SideChannel::HookCode(code)) = side_channel {
        set_config(&mut payload, "code", Value::String(code));
    }
    if let Some(url) = private_url {
        set_config(&mut payload, "url", Value::String(url));
    }
    payload
}

fn set_config(payload: &mut Value, key: &str, value: Value) {
    let Value::Object(map) = payload else {
        return;
    };
    let config = map
        .entry("config")
        .or_insert_with(|| Value::Object(Map::new()));
    if !config.is_object() {
        *config = Value::Object(Map::new());
    }
    if let Value::Object(config) = config {
        config.insert(key.to_owned(), value);
    }
}

/// `true` for a new non-function private hook whose URL is not overridden.
pub(crate) fn needs_private_url(node: &MappingNode, payload: &Value) -> bool {
    let is_function = payload.get("type").and_then(Value::as_str) == Some("function");
    let private = payload
        .get("config")
        .and_then(|config| config.get("private"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let url_overridden = node.overrides().is_some_and(|table| {
        FieldPath::parse("config.url").is_ok_and(|url| table.writes(&url))
    });
    node.target_object.is_none() && !is_function && private && !url_overridden
}

fn prepare_workspace(mut payload: Value, organization_url: &str) -> Value {
    if let Value::Object(map) = &mut payload {
        map.insert("queues".to_owned(), json!([]));
        map.insert(
            "organization".to_owned(),
            Value::String(organization_url.to_owned()),
        );
    }
    payload
}

fn prepare_queue(mut payload: Value, pairs: &PairTable) -> Value {
    if let Value::Object(map) = &mut payload {
        for field in QUEUE_STRIPPED_FIELDS {
            map.remove(field);
        }
        for field in QUEUE_SINGLE_REFERENCES {
            let translated = map
                .get(field)
                .and_then(Value::as_str)
                .and_then(|url| pairs.translate_url(url));
            match translated {
                Some(url) => map.insert(field.to_owned(), Value::String(url)),
                None => map.remove(field),
            };
        }
        for field in QUEUE_LIST_REFERENCES {
            if let Some(Value::Array(urls)) = map.get_mut(field) {
                *urls = urls
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|url| pairs.translate_url(url))
                    .map(Value::String)
                    .collect();
            }
        }
    }
    payload
}

fn prepare_inbox(mut payload: Value, queue_url: Option<String>) -> Value {
    if let Value::Object(map) = &mut payload {
        let queues = queue_url.map(Value::String).into_iter().collect();
        map.insert("queues".to_owned(), Value::Array(queues));
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use prd_adapters::memory::{InMemoryObjectStore, StoreOp};
    use prd_override::AttributeOverride;

    const SRC: &str = "https://src/api/v1";

    fn settings(same_organization: bool) -> UnitSettings {
        UnitSettings {
            same_organization,
            token_owner_url: Some("https://memory.invalid/api/v1/users/77".to_owned()),
            organization_url: "https://memory.invalid/api/v1/organizations/100".to_owned(),
        }
    }

    #[test]
    fn organization_keeps_whitelisted_fields() {
        let source = json!({"id": 1, "name": "Acme", "metadata": {"a": 1}, "ui_settings": {}});
        let fields = vec!["ui_settings".to_owned(), "metadata".to_owned(), "absent".to_owned()];
        assert_eq!(
            prepare_organization(&source, &fields),
            json!({"ui_settings": {}, "metadata": {"a": 1}})
        );
    }

    #[test]
    fn hook_payload_is_detached_and_reowned() {
        let source = SourceObject::new(
            ObjectKind::Hook,
            json!({
                "id": 3,
                "run_after": [format!("{SRC}/hooks/1")],
                "queues": [format!("{SRC}/queues/9")],
                "token_owner": format!("{SRC}/users/5"),
                "config": {"code": "old", "runtime": "python3.12"}
            }),
        )
        .with_side_channel(SideChannel::HookCode("new".to_owned()));

        let payload = prepare_hook(source.clone(), &settings(false), None);
        assert_eq!(payload["run_after"], json!([]));
        assert_eq!(payload["queues"], json!([]));
        assert_eq!(payload["token_owner"], "https://memory.invalid/api/v1/users/77");
        assert_eq!(payload["config"]["code"], "new");

        let same_org = prepare_hook(source, &settings(true), Some("https://p".to_owned()));
        assert_eq!(same_org["token_owner"], format!("{SRC}/users/5"));
        assert_eq!(same_org["config"]["url"], "https://p");
    }

    #[test]
    fn schema_formulas_replace_matching_datapoints() {
        let source = SourceObject::new(
            ObjectKind::Schema,
            json!({
                "id": 2,
                "queues": [format!("{SRC}/queues/9")],
                "content": [{
                    "category": "section",
                    "id": "totals",
                    "children": [
                        {"category": "datapoint", "id": "total", "formula": "0"},
                        {"category": "datapoint", "id": "tax"}
                    ]
                }]
            }),
        )
        .with_side_channel(SideChannel::FormulaFields(BTreeMap::from([(
            "total".to_owned(),
            "a + b".to_owned(),
        )])));

        let payload = prepare_schema(source);
        assert_eq!(payload["queues"], json!([]));
        assert_eq!(payload["content"][0]["children"][0]["formula"], "a + b");
        assert!(payload["content"][0]["children"][1].get("formula").is_none());
    }

    #[test]
    fn queue_references_are_translated_or_dropped() {
        let mut pairs = PairTable::new();
        pairs.insert(
            ObjectId::new(4),
            json!({"id": 104, "url": "https://dst/api/v1/workspaces/104"}),
        );
        pairs.insert(
            ObjectId::new(1),
            json!({"id": 101, "url": "https://dst/api/v1/hooks/101"}),
        );

        let payload = prepare_queue(
            json!({
                "id": 7,
                "counts": {"to_review": 3},
                "inbox": format!("{SRC}/inboxes/8"),
                "workspace": format!("{SRC}/workspaces/4"),
                "schema": format!("{SRC}/schemas/2"),
                "hooks": [format!("{SRC}/hooks/1"), format!("{SRC}/hooks/3")],
                "webhooks": []
            }),
            &pairs,
        );

        assert!(payload.get("counts").is_none());
        assert!(payload.get("inbox").is_none());
        assert!(payload.get("schema").is_none());
        assert_eq!(payload["workspace"], "https://dst/api/v1/workspaces/104");
        assert_eq!(payload["hooks"], json!(["https://dst/api/v1/hooks/101"]));
    }

    #[test]
    fn workspace_and_inbox_are_reparented() {
        let workspace = prepare_workspace(
            json!({"queues": [format!("{SRC}/queues/1")], "organization": format!("{SRC}/organizations/1")}),
            "https://dst/api/v1/organizations/100",
        );
        assert_eq!(workspace["queues"], json!([]));
        assert_eq!(workspace["organization"], "https://dst/api/v1/organizations/100");

        let inbox = prepare_inbox(
            json!({"queues": [format!("{SRC}/queues/1")]}),
            Some("https://dst/api/v1/queues/7".to_owned()),
        );
        assert_eq!(inbox["queues"], json!(["https://dst/api/v1/queues/7"]));
    }

    #[test]
    fn private_hook_detection() {
        let payload = json!({"type": "webhook", "config": {"private": true}});
        let node = MappingNode::new(ObjectId::new(3), "h");
        assert!(needs_private_url(&node, &payload));

        let released = node.clone().with_target(ObjectId::new(30));
        assert!(!needs_private_url(&released, &payload));

        let table: AttributeOverride =
            serde_json::from_value(json!({"config.url": "https://real"})).unwrap();
        let overridden = node.clone().with_override(table);
        assert!(!needs_private_url(&overridden, &payload));

        let whole_config: AttributeOverride =
            serde_json::from_value(json!({"config": {"private": true, "url": "https://real"}}))
                .unwrap();
        assert!(!needs_private_url(&node.clone().with_override(whole_config), &payload));
        let other_config: AttributeOverride =
            serde_json::from_value(json!({"config": {"private": true}})).unwrap();
        assert!(needs_private_url(&node.clone().with_override(other_config), &payload));

        let function = json!({"type": "function", "config": {"private": true}});
        assert!(!needs_private_url(&node, &function));
    }

    #[tokio::test]
    async fn cross_org_template_is_matched_by_name() {
        let source_store = Arc::new(InMemoryObjectStore::new().with_base_url(SRC));
        source_store
            .insert(
                ObjectKind::HookTemplate,
                ObjectId::new(11),
                json!({"name": "Email notifications"}),
            )
            .await;
        let target = Arc::new(InMemoryObjectStore::new());
        let matched = target
            .insert(
                ObjectKind::HookTemplate,
                ObjectId::new(500),
                json!({"name": "Email notifications"}),
            )
            .await;

        let collaborators = Collaborators {
            target: target.clone(),
            source_store: Some(source_store),
            settings: Arc::new(settings(false)),
        };
        let payload = json!({
            "name": "notify",
            "hook_template": format!("{SRC}/hook_templates/11"),
            "events": ["annotation_status"],
            "config": {"template": true}
        });

        let (record, created) = release_hook(&collaborators, None, payload).await.unwrap();
        assert!(created);
        assert_eq!(record["hook_template"], matched["url"]);
        assert_eq!(record["config"]["template"], true);

        let ops: Vec<_> = target.calls().await.iter().map(|call| call.op).collect();
        assert_eq!(
            ops,
            [StoreOp::List, StoreOp::CreateFromTemplate, StoreOp::Update]
        );
    }

    #[tokio::test]
    async fn unmatched_template_falls_back_to_plain_create() {
        let source_store = Arc::new(InMemoryObjectStore::new());
        source_store
            .insert(
                ObjectKind::HookTemplate,
                ObjectId::new(11),
                json!({"name": "Only on source"}),
            )
            .await;
        let target = Arc::new(InMemoryObjectStore::new());
        let collaborators = Collaborators {
            target: target.clone(),
            source_store: Some(source_store),
            settings: Arc::new(settings(false)),
        };

        let payload = json!({"name": "h", "hook_template": format!("{SRC}/hook_templates/11")});
        let (_, created) = release_hook(&collaborators, None, payload).await.unwrap();
        assert!(created);
        let ops: Vec<_> = target.calls().await.iter().map(|call| call.op).collect();
        assert_eq!(ops, [StoreOp::List, StoreOp::Create]);
    }

    #[tokio::test]
    async fn queue_unit_releases_its_inbox() {
        let target = Arc::new(InMemoryObjectStore::new());
        let collaborators = Collaborators {
            target: target.clone(),
            source_store: None,
            settings: Arc::new(settings(true)),
        };
        let queue_node = MappingNode::new(ObjectId::new(7), "q");
        let inbox_node = MappingNode::new(ObjectId::new(8), "i");
        let mut input = UnitInput::new(
            &queue_node,
            SourceObject::new(ObjectKind::Queue, json!({"id": 7, "name": "q"})),
        );
        input.inbox = Some(Box::new(UnitInput::new(
            &inbox_node,
            SourceObject::new(ObjectKind::Inbox, json!({"id": 8, "email": "x@y"})),
        )));

        let outcomes = run_unit(collaborators, Arc::new(PairTable::new()), Phase::Queues, input).await;
        assert_eq!(outcomes.len(), 2);
        let Outcome::Released { record: queue, .. } = &outcomes[0] else {
            panic!("queue not released");
        };
        let Outcome::Released { record: inbox, kind, .. } = &outcomes[1] else {
            panic!("inbox not released");
        };
        assert_eq!(*kind, ObjectKind::Inbox);
        assert_eq!(inbox["queues"], json!([queue["url"].clone()]));
    }
}
