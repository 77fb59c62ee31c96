//! Playground workload.
//!
//! [`populate`] fills the store with one company's org chart; it is meant
//! to run with observation suppressed. [`run_features`] then exercises the
//! watched operations one feature at a time, feeding earlier results into
//! later calls.

use indexmap::IndexMap;
use tracing::info;
use wirecheck_core::{CallError, CoreError, EntityRef, Invoke, Request, Value};

const GIVEN_NAMES: &[&str] = &[
    "Salvatore", "Alan", "Elmer", "Charlie", "Stanley", "Edna", "Dolores", "Lois", "Cathy",
    "Grace", "Perry", "Karl", "Gene", "Celia", "Margie", "Janice", "Edward", "Lyle", "Sophia",
    "Thelma", "Ruby", "Jamie",
];

const SURNAMES: &[&str] = &[
    "Ryan", "McLeod", "Peters", "Owens", "Foster", "Sanders", "Holmes", "Robbins", "Tillman",
    "Crawford", "Olson", "Horton", "Huber", "Howe", "Douglas", "Whitaker", "Barron", "Everett",
    "Higgins",
];

const PRONOUNS: &[&str] = &["he/him", "she/her", "they/them"];

const ORG_CHART: &[(&str, &[&str])] = &[
    ("Exec", &["Exec"]),
    ("Engineering", &["DBX", "Server", "Cloud"]),
    ("Marketing", &["Developer Relations", "Public Relations"]),
    ("Human Resources", &["Talent Acquisition"]),
];

/// Members created per team, the head included
pub const TEAM_SIZE: usize = 4;

/// What [`populate`] created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Population {
    /// Departments
    pub departments: usize,
    /// Teams
    pub teams: usize,
    /// People
    pub people: usize,
    /// Positions
    pub positions: usize,
}

fn call(api: &dyn Invoke, receiver: Value, message: &str, args: Vec<Value>) -> Result<Value, CallError> {
    api.invoke(&Request::new(receiver, message).with_args(args), None)
}

fn entity(message: &str, value: Value) -> Result<EntityRef, CallError> {
    match value {
        Value::Entity(e) => Ok(e),
        other => Err(CoreError::format(format!("{} returned {}", message, other.describe())).into()),
    }
}

fn model(name: &str) -> Value {
    Value::Class(name.to_string())
}

/// Create the company, its departments and teams, and a few people per team
///
/// Names are picked deterministically, so two runs produce the same data
/// apart from document ids.
///
/// # Errors
///
/// Propagates the first failing call
pub fn populate(api: &dyn Invoke) -> Result<Population, CallError> {
    let mut population = Population::default();
    let company = entity(
        "create",
        call(
            api,
            model("Company"),
            "create",
            vec![Value::map([
                ("name", Value::string("Acme, Inc.")),
                ("industry", Value::string("tech")),
            ])],
        )?,
    )?;

    for (department_name, teams) in ORG_CHART {
        let departments = call(api, Value::Entity(company.clone()), "departments", vec![])?;
        let department = entity(
            "create",
            call(api, departments, "create", vec![Value::map([("name", Value::string(*department_name))])])?,
        )?;
        population.departments += 1;

        for team_name in *teams {
            let members = call(api, Value::Entity(department.clone()), "teams", vec![])?;
            let team = entity(
                "create",
                call(api, members, "create", vec![Value::map([("name", Value::string(*team_name))])])?,
            )?;
            population.teams += 1;

            for seat in 0..TEAM_SIZE {
                let n = population.people;
                let person = entity(
                    "create",
                    call(
                        api,
                        model("Person"),
                        "create",
                        vec![Value::map([
                            ("team", Value::Entity(team.clone())),
                            ("pronouns", Value::string(PRONOUNS[n % PRONOUNS.len()])),
                            ("age", Value::Int(25 + (n as i64 * 7) % 40)),
                            ("flags", Value::Int(0b0110)),
                            ("skills", Value::Array(vec![Value::string("rust"), Value::string("sql")])),
                            (
                                "name",
                                Value::map([
                                    ("given", Value::string(GIVEN_NAMES[n % GIVEN_NAMES.len()])),
                                    ("surname", Value::string(SURNAMES[(n * 3) % SURNAMES.len()])),
                                ]),
                            ),
                        ])],
                    )?,
                )?;
                population.people += 1;

                if seat == 0 {
                    call(
                        api,
                        model("Position"),
                        "create",
                        vec![Value::map([
                            ("title", Value::string(format!("Head of {}", team_name))),
                            ("person", Value::Entity(person)),
                        ])],
                    )?;
                    population.positions += 1;
                }
            }
        }
    }

    info!(
        departments = population.departments,
        teams = population.teams,
        people = population.people,
        "populated"
    );
    Ok(population)
}

/// Run every feature in order, returning each feature's last result
///
/// # Errors
///
/// Propagates the first failing call
pub fn run_features(api: &dyn Invoke) -> Result<IndexMap<&'static str, Value>, CallError> {
    let mut results = IndexMap::new();
    let people = model("Person");
    let companies = model("Company");

    results.insert("count", call(api, people.clone(), "count", vec![])?);
    results.insert("estimated_count", call(api, people.clone(), "estimated_count", vec![])?);
    results.insert("empty?", call(api, people.clone(), "empty?", vec![])?);

    call(api, people.clone(), "exists?", vec![])?;
    call(
        api,
        people.clone(),
        "exists?",
        vec![Value::map([("pronouns", Value::string("they/them"))])],
    )?;
    results.insert(
        "exists?",
        call(api, people.clone(), "exists?", vec![Value::ObjectId(wirecheck_core::ObjectId::new())])?,
    );

    let all = call(api, companies.clone(), "all", vec![])?;
    let found = call(api, all, "to_a", vec![])?;
    let first_company = found
        .as_array()
        .and_then(|items| items.first())
        .and_then(Value::as_entity)
        .cloned()
        .ok_or_else(|| CoreError::state("no company to look up"))?;
    results.insert("find_all", found.clone());

    let id = first_company.id().map_or(Value::Null, Value::ObjectId);
    let company = entity("find", call(api, companies.clone(), "find", vec![id])?)?;
    results.insert("find_one", Value::Entity(company.clone()));

    let name = company.attribute("name").unwrap_or(Value::Null);
    call(api, companies.clone(), "find_by", vec![Value::map([("name", name.clone())])])?;
    results.insert(
        "find_by",
        call(api, companies, "find_by!", vec![Value::map([("name", name)])])?,
    );

    results.insert("first", call(api, people.clone(), "first", vec![])?);
    let last = call(api, people.clone(), "last", vec![])?;
    results.insert("last", last.clone());

    let mut visited = 0i64;
    let mut count_visits = |_: &Value| visited += 1;
    let seniors = call(
        api,
        people.clone(),
        "where",
        vec![Value::map([("age", Value::map([("$gte", Value::Int(40))]))])],
    )?;
    api.invoke(&Request::new(seniors, "each"), Some(&mut count_visits))?;
    results.insert("each", Value::Int(visited));

    let departments = call(api, Value::Entity(company), "departments", vec![])?;
    results.insert("relation_count", call(api, departments, "count", vec![])?);

    if let Value::Entity(person) = last {
        let receiver = Value::Entity(person.clone());
        call(api, receiver.clone(), "inc", vec![Value::map([("age", Value::Int(1))])])?;
        call(
            api,
            receiver.clone(),
            "bit",
            vec![Value::Symbol("flags".into()), Value::map([("xor", Value::Int(0b0011))])],
        )?;
        call(api, receiver.clone(), "pop", vec![Value::map([("skills", Value::Int(1))])])?;
        person.set_attribute("pronouns", Value::string("they/them"));
        call(api, receiver.clone(), "update_document", vec![])?;
        results.insert("reload", call(api, receiver, "reload", vec![])?);
    }

    let positions = model("Position");
    if let Value::Entity(position) = call(api, positions.clone(), "first", vec![])? {
        results.insert("destroy", call(api, Value::Entity(position), "destroy", vec![])?);
    }
    results.insert(
        "delete_all",
        call(
            api,
            positions,
            "delete_all",
            vec![Value::map([("title", Value::string("Head of Cloud"))])],
        )?,
    );

    info!(features = results.len(), "features complete");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::config::{Dialect, StoreConfig};
    use crate::models::playground;
    use crate::server::MemoryServer;
    use std::sync::Arc;

    fn client(dialect: Dialect) -> (Arc<MemoryServer>, Client) {
        let server = Arc::new(MemoryServer::new());
        let config = StoreConfig {
            dialect,
            ..StoreConfig::default()
        };
        let client = Client::with_config(server.clone(), playground().unwrap(), config);
        (server, client)
    }

    #[test]
    fn test_populate_org_chart() {
        let (server, client) = client(Dialect::V1);
        let population = populate(&client).unwrap();
        assert_eq!(population.departments, 4);
        assert_eq!(population.teams, 7);
        assert_eq!(population.people, 7 * TEAM_SIZE);
        assert_eq!(server.len("people"), population.people);
        assert_eq!(server.len("positions"), population.teams);
        assert!(server.documents("people")[0]["team_id"].get("$oid").is_some());
        assert!(server.documents("teams")[0]["department_id"].get("$oid").is_some());
    }

    #[test]
    fn test_features_agree_across_dialects() {
        let mut outcomes = Vec::new();
        for dialect in [Dialect::V1, Dialect::V2] {
            let (server, client) = client(dialect);
            let population = populate(&client).unwrap();
            let results = run_features(&client).unwrap();
            assert_eq!(results["count"], Value::Int(population.people as i64));
            assert_eq!(results["empty?"], Value::Bool(false));
            assert_eq!(results["exists?"], Value::Bool(false));
            assert_eq!(results["relation_count"], Value::Int(4));
            assert_eq!(results["destroy"], Value::Bool(true));
            assert_eq!(results["delete_all"], Value::Int(1));
            assert_eq!(server.len("positions"), population.positions - 2);
            outcomes.push((results["each"].clone(), results["estimated_count"].clone()));
        }
        assert_eq!(outcomes[0], outcomes[1]);
    }
}
