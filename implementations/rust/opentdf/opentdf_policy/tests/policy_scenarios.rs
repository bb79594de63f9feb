use futures::FutureExt;
use opentdf_db::{BreakerState, DatabaseConfiguration};
use opentdf_policy::models::{
    ActiveStateEnum, AddObligationTriggerRequest, AttributeRuleType, Condition,
    CreateAttributeRequest, CreateAttributeValueRequest, CreateNamespaceRequest,
    CreateObligationRequest, CreateSubjectMappingRequest, Identifier, ListAttributeValuesRequest,
    ListAttributesRequest, ListNamespacesRequest, StandardAction, SubjectConditionSetCreate,
    SubjectMappingAction, SubjectMappingOperatorEnum, SubjectProperty, SubjectSet,
};
use opentdf_policy::{
    AttributeValuesRepository, AttributesRepository, ErrorKind, NamespacesRepository,
    ObligationsRepository, PolicyConfiguration, PolicyDbClient, Result,
    SubjectMappingsRepository,
};
use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_namespace_names_are_normalized() -> Result<()> {
    let client = PolicyDbClient::in_memory("scenario_namespace").await?;

    let namespace = client
        .create_namespace(&CreateNamespaceRequest::new("TeStInG.org"))
        .await?;
    assert_eq!(namespace.name, "testing.org");
    assert_eq!(namespace.fqn, "https://testing.org");
    let retrieved = client.get_namespace(&Identifier::id(&namespace.id)).await?;
    assert_eq!(retrieved, namespace);
    assert!(
        retrieved.metadata.created_at > 1_600_000_000_000_000,
        "{:?}",
        retrieved.metadata
    );
    Ok(())
}

#[tokio::test]
async fn test_values_keep_their_authoring_order() -> Result<()> {
    let client = PolicyDbClient::in_memory("scenario_values_order").await?;
    let attribute = create_testing_attribute(&client).await?;
    assert_eq!(values(&client, &attribute.id).await?, ["first", "second", "third"]);

    client
        .create_attribute_value(&CreateAttributeValueRequest {
            attribute_id: attribute.id.clone(),
            value: "FOURTH".to_string(),
            metadata: None,
        })
        .await?;
    let second = attribute.value("second").unwrap();
    client.deactivate_attribute_value(&second.id).await?;

    assert_eq!(
        values(&client, &attribute.id).await?,
        ["first", "second", "third", "fourth"]
    );
    Ok(())
}

#[tokio::test]
async fn test_matched_subject_mappings() -> Result<()> {
    let client = PolicyDbClient::in_memory("scenario_subject_mappings").await?;
    create_testing_attribute(&client).await?;
    let value = client
        .get_attribute_value(&Identifier::fqn("https://testing.org/attr/a1/value/first"))
        .await?;

    let mapping = client
        .create_subject_mapping(&CreateSubjectMappingRequest {
            attribute_value_id: value.id.clone(),
            actions: vec![SubjectMappingAction::Standard(StandardAction::Decrypt)],
            new_subject_condition_set: Some(SubjectConditionSetCreate {
                subject_sets: vec![SubjectSet::single(Condition::new(
                    ".email",
                    SubjectMappingOperatorEnum::In,
                    vec!["alice@x".to_string()],
                ))],
                metadata: None,
            }),
            ..Default::default()
        })
        .await?;

    let matched = client
        .get_matched_subject_mappings(&[SubjectProperty::selector(".email")])
        .await?;
    assert_eq!(matched, vec![mapping]);

    let unmatched = client
        .get_matched_subject_mappings(&[SubjectProperty::selector(".department")])
        .await?;
    assert!(unmatched.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_inactive_values_are_still_resolved_by_fqn() -> Result<()> {
    let client = PolicyDbClient::in_memory("scenario_inactive_namespace").await?;
    let attribute = create_testing_attribute(&client).await?;
    client.deactivate_namespace(&attribute.namespace.id).await?;

    let fqn = "https://testing.org/attr/a1/value/first".to_string();
    let resolved = client.get_attributes_by_value_fqns(&[fqn.clone()]).await?;
    let found = resolved.get(&fqn).unwrap();
    assert_eq!(found.value.value, "first");
    assert!(!found.value.active);
    assert!(!found.attribute.active);

    let active = client
        .list_attributes(&ListAttributesRequest {
            state: ActiveStateEnum::Active,
            ..Default::default()
        })
        .await?;
    assert!(active.items.is_empty());
    let active_namespaces = client
        .list_namespaces(&ListNamespacesRequest {
            state: ActiveStateEnum::Active,
            ..Default::default()
        })
        .await?;
    assert!(active_namespaces.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_obligations_for_a_client() -> Result<()> {
    let client = PolicyDbClient::in_memory("scenario_obligations").await?;
    let namespace = client
        .create_namespace(&CreateNamespaceRequest::new("corp"))
        .await?;
    let attribute = client
        .create_attribute(&CreateAttributeRequest {
            namespace_id: namespace.id.clone(),
            name: "classification".to_string(),
            rule: AttributeRuleType::AnyOf,
            values: vec!["secret".to_string()],
            metadata: None,
        })
        .await?;
    let attribute_value = &attribute.values[0];

    let obligation = client
        .create_obligation(&CreateObligationRequest {
            namespace: Identifier::name("corp"),
            name: "watermark".to_string(),
            values: vec!["visible".to_string()],
            metadata: None,
        })
        .await?;
    client
        .add_obligation_trigger(&AddObligationTriggerRequest {
            obligation_value: Identifier::id(&obligation.values[0].id),
            attribute_value: Identifier::fqn(&attribute_value.fqn),
            action: Identifier::name("READ"),
            client_id: Some("cli-42".to_string()),
            metadata: None,
        })
        .await?;

    let value = Identifier::fqn(&attribute_value.fqn);
    assert_eq!(
        client
            .get_obligations_for_action(&value, "READ", Some("cli-42"))
            .await?,
        vec!["https://corp/obl/watermark/value/visible".to_string()]
    );
    assert!(client
        .get_obligations_for_action(&value, "READ", Some("other"))
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reads_survive_replica_failures() -> Result<()> {
    let db_file = NamedTempFile::new().unwrap();
    let path = db_file.path().to_string_lossy().to_string();
    let configuration = DatabaseConfiguration {
        sqlite_replicas: vec![path.clone(), path],
        ..DatabaseConfiguration::sqlite(db_file.path())
    };
    let client = PolicyDbClient::create(&configuration, PolicyConfiguration::default()).await?;
    client
        .create_namespace(&CreateNamespaceRequest::new("replicated.org"))
        .await?;

    client.database().replicas()[0].pool().close().await;
    for _ in 0..10 {
        let namespace = client
            .get_namespace(&Identifier::name("replicated.org"))
            .await?;
        assert_eq!(namespace.fqn, "https://replicated.org");
    }
    assert_eq!(
        client.database().breaker_states(),
        vec![BreakerState::Open, BreakerState::Closed]
    );

    client.database().replicas()[1].pool().close().await;
    for _ in 0..10 {
        let namespaces = client.list_all_namespaces().await?;
        assert_eq!(namespaces.len(), 1);
    }
    assert_eq!(
        client.database().breaker_states(),
        vec![BreakerState::Open, BreakerState::Open]
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_transaction_leaves_no_trace() -> Result<()> {
    let client = PolicyDbClient::in_memory("scenario_transaction").await?;

    let result: Result<()> = client
        .run_in_tx(|tx| {
            async move {
                let namespace = tx
                    .create_namespace(&CreateNamespaceRequest::new("atomic.org"))
                    .await?;
                tx.create_attribute(&CreateAttributeRequest {
                    namespace_id: namespace.id,
                    name: "level".to_string(),
                    rule: AttributeRuleType::Hierarchy,
                    values: vec!["high".to_string(), "high".to_string()],
                    metadata: None,
                })
                .await?;
                Ok(())
            }
            .boxed()
        })
        .await;
    assert!(result.unwrap_err().is(ErrorKind::UniqueConstraintViolation));

    assert!(client.list_all_namespaces().await?.is_empty());
    let error = client
        .get_attribute(&Identifier::fqn("https://atomic.org/attr/level"))
        .await
        .unwrap_err();
    assert!(error.is(ErrorKind::NotFound));
    Ok(())
}

/// HELPERS
async fn create_testing_attribute(
    client: &PolicyDbClient,
) -> Result<opentdf_policy::models::Attribute> {
    let namespace = client
        .create_namespace(&CreateNamespaceRequest::new("testing.org"))
        .await?;
    client
        .create_attribute(&CreateAttributeRequest {
            namespace_id: namespace.id,
            name: "A1".to_string(),
            rule: AttributeRuleType::Hierarchy,
            values: vec![
                "FIRST".to_string(),
                "SECOND".to_string(),
                "THIRD".to_string(),
            ],
            metadata: None,
        })
        .await
}

async fn values(client: &PolicyDbClient, attribute_id: &str) -> Result<Vec<String>> {
    let page = client
        .list_attribute_values(&ListAttributeValuesRequest {
            attribute_id: attribute_id.to_string(),
            state: ActiveStateEnum::Any,
            ..Default::default()
        })
        .await?;
    Ok(page.items.into_iter().map(|v| v.value).collect())
}
