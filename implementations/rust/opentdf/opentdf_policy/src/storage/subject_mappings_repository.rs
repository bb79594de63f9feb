use crate::models::{
    CreateSubjectMappingRequest, ListResponse, ListSubjectConditionSetsRequest,
    ListSubjectMappingsRequest, SubjectConditionSet, SubjectConditionSetCreate, SubjectMapping,
    SubjectProperty, UpdateSubjectConditionSetRequest, UpdateSubjectMappingRequest,
};
use async_trait::async_trait;
use opentdf_db::Result;

/// This repository stores the subject condition sets and the subject mappings
/// entitling the subjects matching a condition set to an attribute value
#[async_trait]
pub trait SubjectMappingsRepository: Send + Sync + 'static {
    async fn get_subject_condition_set(&self, id: &str) -> Result<SubjectConditionSet>;

    async fn list_subject_condition_sets(
        &self,
        request: &ListSubjectConditionSetsRequest,
    ) -> Result<ListResponse<SubjectConditionSet>>;

    async fn create_subject_condition_set(
        &self,
        request: &SubjectConditionSetCreate,
    ) -> Result<SubjectConditionSet>;

    async fn update_subject_condition_set(
        &self,
        request: &UpdateSubjectConditionSetRequest,
    ) -> Result<SubjectConditionSet>;

    /// Delete a condition set. Fails if a subject mapping still uses it
    async fn delete_subject_condition_set(&self, id: &str) -> Result<SubjectConditionSet>;

    /// Delete all the condition sets which are not used by any subject mapping and return them
    async fn delete_all_unmapped_subject_condition_sets(&self) -> Result<Vec<SubjectConditionSet>>;

    async fn get_subject_mapping(&self, id: &str) -> Result<SubjectMapping>;

    async fn list_subject_mappings(
        &self,
        request: &ListSubjectMappingsRequest,
    ) -> Result<ListResponse<SubjectMapping>>;

    async fn create_subject_mapping(
        &self,
        request: &CreateSubjectMappingRequest,
    ) -> Result<SubjectMapping>;

    async fn update_subject_mapping(
        &self,
        request: &UpdateSubjectMappingRequest,
    ) -> Result<SubjectMapping>;

    /// Delete a subject mapping. Its condition set is kept
    async fn delete_subject_mapping(&self, id: &str) -> Result<SubjectMapping>;

    /// Return the subject mappings on active attribute values with a condition on one of
    /// the selectors of the given properties. The property values are not evaluated
    async fn get_matched_subject_mappings(
        &self,
        properties: &[SubjectProperty],
    ) -> Result<Vec<SubjectMapping>>;
}
