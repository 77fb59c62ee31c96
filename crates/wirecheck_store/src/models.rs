//! Playground models.

use wirecheck_core::{CoreResult, EntitySchema, RelationDef, RelationKind, TypeRegistry};

/// Registry with the playground types: organizations, companies with
/// departments and teams, people with an embedded name, and positions
///
/// # Errors
///
/// Never fails on a fresh registry; the result mirrors
/// [`TypeRegistry::register`]
pub fn playground() -> CoreResult<TypeRegistry> {
    TypeRegistry::new().with_types([
        EntitySchema::new("Organization", "organizations"),
        EntitySchema::new("Company", "companies").with_relation(
            "departments",
            RelationDef::new(RelationKind::Many, "Department").with_foreign_key("company_id"),
        ),
        EntitySchema::new("Department", "departments")
            .with_relation(
                "company",
                RelationDef::new(RelationKind::One, "Company").with_foreign_key("company_id"),
            )
            .with_relation(
                "teams",
                RelationDef::new(RelationKind::Many, "Team").with_foreign_key("department_id"),
            ),
        EntitySchema::new("Team", "teams")
            .with_relation(
                "department",
                RelationDef::new(RelationKind::One, "Department").with_foreign_key("department_id"),
            )
            .with_relation(
                "members",
                RelationDef::new(RelationKind::Many, "Person").with_foreign_key("team_id"),
            ),
        EntitySchema::new("Person", "people")
            .with_relation(
                "team",
                RelationDef::new(RelationKind::One, "Team").with_foreign_key("team_id"),
            )
            .with_relation("name", RelationDef::new(RelationKind::EmbedsOne, "Name"))
            .with_relation(
                "positions",
                RelationDef::new(RelationKind::Many, "Position").with_foreign_key("person_id"),
            ),
        EntitySchema::new("Name", "names"),
        EntitySchema::new("Position", "positions").with_relation(
            "person",
            RelationDef::new(RelationKind::One, "Person").with_foreign_key("person_id"),
        ),
    ])
}
