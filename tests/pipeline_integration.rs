use async_trait::async_trait;
use iam_access_validator::db::seed::read_csv;
use iam_access_validator::db::{ApplicationRow, RoleRow, SqliteIamStore, UserRow};
use iam_access_validator::deterministic::DeterministicVerdict;
use iam_access_validator::knowledge::{ingest_iam_store, HashingEmbedder, InMemoryKnowledgeStore};
use iam_access_validator::llm::CompletionBackend;
use iam_access_validator::semantic::SemanticVerdict;
use iam_access_validator::{Result, Stage, ValidationPipeline, ValidatorConfig};
use regex::Regex;
use std::sync::Arc;

const USERS: &str = "user_id,user_name,email,manager
1,Aaron.Nichols,aaron.nichols@example.com,Maria.Lopez
2,Maria.Lopez,maria.lopez@example.com,
";

const APPLICATIONS: &str = "app_id,app_name,app_owner
1,Workday,HR IT
2,Salesforce,Sales Ops
3,AzureAD,Identity Team
";

const ROLES: &str = "role_id,role_name,app_name,owner
1,HR Analyst,Workday,HR Ops
2,Payroll Admin,Salesforce,Finance
3,IT Admin,AzureAD,Identity Team
";

/// Stands in for the language model: extraction answers come from a fixed
/// vocabulary, lookup instructions become SQL, the classifier reply is canned.
struct ScriptedBackend {
    users: Vec<&'static str>,
    applications: Vec<&'static str>,
    roles: Vec<&'static str>,
    classifier_reply: &'static str,
}

impl ScriptedBackend {
    fn new(classifier_reply: &'static str) -> Self {
        Self {
            users: vec!["Aaron.Nichols", "Maria.Lopez", "Zed.Unknown"],
            applications: vec!["Workday", "Salesforce", "AzureAD"],
            roles: vec!["HR Analyst", "Payroll Admin", "IT Admin", "Chief Wizard"],
            classifier_reply,
        }
    }

    fn extraction_reply(&self, key: &str, vocabulary: &[&str], prompt: &str) -> String {
        let request = prompt.rsplit_once("Request: ").map(|(_, r)| r).unwrap_or("");
        match vocabulary.iter().find(|name| request.contains(*name)) {
            Some(name) => format!("```json\n{{\"{}\": \"{}\"}}\n```", key, name),
            None => format!("{{\"{}\": null}}", key),
        }
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if prompt.contains("IAM access validation assistant") {
            return Ok(self.classifier_reply.to_string());
        }
        if prompt.contains("Instruction: ") {
            return Ok(sql_for(prompt));
        }
        let reply = if prompt.contains("\"user_name\"") {
            self.extraction_reply("user_name", &self.users, prompt)
        } else if prompt.contains("\"application_name\"") {
            self.extraction_reply("application_name", &self.applications, prompt)
        } else {
            self.extraction_reply("role_name", &self.roles, prompt)
        };
        Ok(reply)
    }
}

fn sql_for(prompt: &str) -> String {
    let pattern = Regex::new(
        r"selects (\w+) from (\w+) where (\w+) equals '([^']*)'(?: and (\w+) equals '([^']*)')?",
    )
    .unwrap();
    let caps = pattern.captures(prompt).unwrap();
    let mut sql = format!(
        "Here is the query:\n```sql\nSELECT \"{}\" FROM \"{}\" WHERE \"{}\" = '{}'",
        &caps[1], &caps[2], &caps[3], &caps[4]
    );
    if let (Some(column), Some(value)) = (caps.get(5), caps.get(6)) {
        sql.push_str(&format!(" AND \"{}\" = '{}'", column.as_str(), value.as_str()));
    }
    sql.push_str(" LIMIT 1;\n```");
    sql
}

async fn pipeline(classifier_reply: &'static str) -> ValidationPipeline {
    let store = SqliteIamStore::in_memory().unwrap();
    for user in read_csv::<UserRow, _>(USERS.as_bytes()).unwrap() {
        store.upsert_user(&user).unwrap();
    }
    for app in read_csv::<ApplicationRow, _>(APPLICATIONS.as_bytes()).unwrap() {
        store.upsert_application(&app).unwrap();
    }
    for role in read_csv::<RoleRow, _>(ROLES.as_bytes()).unwrap() {
        store.upsert_role(&role).unwrap();
    }

    let knowledge = InMemoryKnowledgeStore::new(Arc::new(HashingEmbedder::default()));
    ingest_iam_store(&store, &knowledge).await.unwrap();

    ValidationPipeline::from_config(
        &ValidatorConfig::default(),
        Arc::new(ScriptedBackend::new(classifier_reply)),
        Arc::new(knowledge),
        Arc::new(store),
    )
}

#[tokio::test]
async fn test_fallback_to_lookups_when_classifier_abstains() {
    let pipeline = pipeline("I think this is probably fine").await;
    let state = pipeline
        .run("Aaron.Nichols needs access to HR Analyst role in Workday")
        .await;

    assert_eq!(state.semantic_verdict(), Some(&SemanticVerdict::Inconclusive));
    assert_eq!(state.deterministic_verdict(), Some(&DeterministicVerdict::Passed));
    assert_eq!(
        state.final_response(),
        Some("VALID: Aaron.Nichols can request HR Analyst in Workday")
    );
    assert_eq!(
        state.processing_steps(),
        &[
            Stage::Init,
            Stage::Extract,
            Stage::SemanticValidate,
            Stage::DeterministicValidate,
            Stage::Finalize
        ]
    );
}

#[tokio::test]
async fn test_classifier_valid_is_trusted() {
    let pipeline = pipeline("VALID: HR Analyst is a Workday role.").await;
    let state = pipeline.run("I need access to HR Analyst role in Workday").await;

    assert_eq!(state.final_response(), Some("VALID: HR Analyst is a Workday role."));
    assert!(!state.processing_steps().contains(&Stage::DeterministicValidate));
    assert_eq!(state.is_valid(), Some(true));
}

#[tokio::test]
async fn test_classifier_invalid_still_runs_lookups() {
    let pipeline = pipeline("INVALID: no such access.").await;
    let state = pipeline.run("I need access to HR Analyst role in Workday").await;

    assert!(matches!(state.semantic_verdict(), Some(SemanticVerdict::Invalid(_))));
    assert_eq!(state.final_response(), Some("VALID: User can request HR Analyst in Workday"));
}

#[tokio::test]
async fn test_role_from_another_application() {
    let pipeline = pipeline("not sure").await;
    let response = pipeline
        .submit("Aaron.Nichols needs the Payroll Admin role in Workday")
        .await;

    assert_eq!(
        response,
        "INVALID: Relationship invalid: Payroll Admin does not exist in Workday. \
         This role may belong to a different application."
    );
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let pipeline = pipeline("not sure").await;
    let response = pipeline
        .submit("Zed.Unknown needs access to HR Analyst role in Workday")
        .await;

    assert_eq!(response, "INVALID: User does not exist in the IAM system");
}

#[tokio::test]
async fn test_unknown_role_is_not_found() {
    let pipeline = pipeline("not sure").await;
    let response = pipeline.submit("Make Aaron.Nichols a Chief Wizard in Workday").await;

    assert_eq!(response, "INVALID: Role does not exist in the IAM system");
}

#[tokio::test]
async fn test_missing_role_is_not_a_failure() {
    let pipeline = pipeline("not sure").await;
    let state = pipeline.run("Aaron.Nichols needs something in Workday").await;

    assert_eq!(state.role_name(), None);
    assert_eq!(state.deterministic_verdict(), Some(&DeterministicVerdict::Passed));
    assert_eq!(
        state.final_response(),
        Some("VALID: Aaron.Nichols can request role in Workday")
    );
}

#[tokio::test]
async fn test_nothing_recognised_is_invalid() {
    let pipeline = pipeline("VALID: never consulted").await;
    let state = pipeline.run("Please sort out my laptop").await;

    assert!(state.error().map_or(false, |e| !e.is_empty()));
    assert_eq!(state.semantic_verdict(), Some(&SemanticVerdict::Skipped));
    assert_eq!(state.is_valid(), Some(false));
    assert!(state.final_response().unwrap().starts_with("INVALID: "));
    assert_eq!(state.processing_steps().len(), 5);
}

#[tokio::test]
async fn test_empty_request() {
    let pipeline = pipeline("not sure").await;
    assert_eq!(pipeline.submit("  ").await, "INVALID: No request provided");
}
