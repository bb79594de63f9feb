use crate::models::{policy_enum, Metadata, MetadataMutable, MetadataUpdateEnum, PageRequest, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

policy_enum!(
    SubjectMappingOperatorEnum {
        #[default]
        Unspecified = 0 => "UNSPECIFIED",
        In = 1 => "IN",
        NotIn = 2 => "NOT_IN",
        InContains = 3 => "IN_CONTAINS",
    }
);

policy_enum!(
    ConditionBooleanTypeEnum {
        #[default]
        Unspecified = 0 => "UNSPECIFIED",
        And = 1 => "AND",
        Or = 2 => "OR",
    }
);

policy_enum!(
    /// Actions known by the platform, which can be used in subject mappings
    StandardAction {
        #[default]
        Unspecified = 0 => "UNSPECIFIED",
        Decrypt = 1 => "DECRYPT",
        Transmit = 2 => "TRANSMIT",
    }
);

/// A condition on an external property of a subject, for example its email address
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Selector of the property in the subject's entity representation, for example `.email`
    pub subject_external_selector_value: String,
    pub operator: SubjectMappingOperatorEnum,
    pub subject_external_values: Vec<String>,
}

impl Condition {
    pub fn new(
        selector: impl Into<String>,
        operator: SubjectMappingOperatorEnum,
        values: Vec<String>,
    ) -> Self {
        Self {
            subject_external_selector_value: selector.into(),
            operator,
            subject_external_values: values,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub conditions: Vec<Condition>,
    pub boolean_operator: ConditionBooleanTypeEnum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSet {
    pub condition_groups: Vec<ConditionGroup>,
}

impl SubjectSet {
    /// A subject set made of a single condition
    pub fn single(condition: Condition) -> Self {
        SubjectSet {
            condition_groups: vec![ConditionGroup {
                conditions: vec![condition],
                boolean_operator: ConditionBooleanTypeEnum::And,
            }],
        }
    }

    /// Return all the selectors used in the conditions of some subject sets
    pub fn selectors(subject_sets: &[SubjectSet]) -> BTreeSet<String> {
        subject_sets
            .iter()
            .flat_map(|s| s.condition_groups.iter())
            .flat_map(|g| g.conditions.iter())
            .map(|c| c.subject_external_selector_value.clone())
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubjectConditionSet {
    pub id: String,
    pub subject_sets: Vec<SubjectSet>,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubjectConditionSetCreate {
    pub subject_sets: Vec<SubjectSet>,
    pub metadata: Option<MetadataMutable>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateSubjectConditionSetRequest {
    pub id: String,
    pub subject_sets: Option<Vec<SubjectSet>>,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListSubjectConditionSetsRequest {
    pub pagination: PageRequest,
}

/// An action allowed by a subject mapping
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectMappingAction {
    Standard(StandardAction),
    Custom(String),
}

/// Entitle the subjects matching a condition set to perform some actions on data
/// carrying an attribute value
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubjectMapping {
    pub id: String,
    pub attribute_value: Value,
    pub subject_condition_set: SubjectConditionSet,
    pub actions: Vec<SubjectMappingAction>,
    pub metadata: Metadata,
}

/// Create a subject mapping, either with an existing condition set or a new one.
/// The existing condition set takes precedence
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateSubjectMappingRequest {
    pub attribute_value_id: String,
    pub actions: Vec<SubjectMappingAction>,
    pub existing_subject_condition_set_id: Option<String>,
    pub new_subject_condition_set: Option<SubjectConditionSetCreate>,
    pub metadata: Option<MetadataMutable>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateSubjectMappingRequest {
    pub id: String,
    pub subject_condition_set_id: Option<String>,
    pub actions: Option<Vec<SubjectMappingAction>>,
    pub metadata: Option<MetadataMutable>,
    pub metadata_update_behavior: MetadataUpdateEnum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListSubjectMappingsRequest {
    pub pagination: PageRequest,
}

/// A property of a subject, as provided by the entity resolution
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubjectProperty {
    pub external_selector_value: String,
    pub external_value: Option<String>,
}

impl SubjectProperty {
    pub fn selector(selector: impl Into<String>) -> Self {
        Self {
            external_selector_value: selector.into(),
            external_value: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_condition_document_format() -> opentdf_db::Result<()> {
        let sets = vec![SubjectSet::single(Condition::new(
            ".email",
            SubjectMappingOperatorEnum::In,
            vec!["alice@x".to_string()],
        ))];
        let json = serde_json::to_value(&sets)?;
        assert_eq!(
            json,
            serde_json::json!([{
                "condition_groups": [{
                    "conditions": [{
                        "subject_external_selector_value": ".email",
                        "operator": "IN",
                        "subject_external_values": ["alice@x"]
                    }],
                    "boolean_operator": "AND"
                }]
            }])
        );

        let action = serde_json::to_string(&SubjectMappingAction::Standard(StandardAction::Decrypt))?;
        assert_eq!(action, r#"{"standard":"DECRYPT"}"#);
        Ok(())
    }

    #[test]
    fn test_selectors() {
        let sets = vec![
            SubjectSet::single(Condition::new(".email", SubjectMappingOperatorEnum::In, vec![])),
            SubjectSet::single(Condition::new(".org.groups[]", SubjectMappingOperatorEnum::NotIn, vec![])),
            SubjectSet::single(Condition::new(".email", SubjectMappingOperatorEnum::InContains, vec![])),
        ];
        assert_eq!(
            SubjectSet::selectors(&sets).into_iter().collect::<Vec<_>>(),
            vec![".email".to_string(), ".org.groups[]".to_string()]
        );
    }
}
