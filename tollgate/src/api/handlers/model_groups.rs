//! HTTP handlers for model group management and resolution.

use crate::{
    AppState,
    api::models::model_groups::{
        ListModelGroupsQuery, ModelGroupCreate, ModelGroupEntriesUpdate, ModelGroupResponse, ModelGroupUpdate,
        ResolutionResponse,
    },
    db::{
        handlers::{ModelGroupFilter, ModelGroups, Repository},
        models::model_groups::{ModelGroupCreateDBRequest, ModelGroupUpdateDBRequest},
    },
    errors::{Error, Result},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

/// Create a model group
#[utoipa::path(
    post,
    path = "/model-groups",
    tag = "model-groups",
    summary = "Create a model group",
    request_body = ModelGroupCreate,
    responses(
        (status = 201, description = "Group created", body = ModelGroupResponse),
        (status = 400, description = "Bad request"),
        (status = 409, description = "A group with this name already exists"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_model_group(
    State(state): State<AppState>,
    Json(data): Json<ModelGroupCreate>,
) -> Result<(StatusCode, Json<ModelGroupResponse>)> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = ModelGroups::new(&mut conn);

    let group = repo
        .create(
            &ModelGroupCreateDBRequest::builder()
                .name(data.name)
                .maybe_description(data.description)
                .build(),
        )
        .await?;

    let entries = repo
        .set_entries(group.id, data.entries.into_iter().map(Into::into).collect())
        .await?;

    Ok((StatusCode::CREATED, Json(ModelGroupResponse::from_parts(group, entries))))
}

/// List model groups
#[utoipa::path(
    get,
    path = "/model-groups",
    tag = "model-groups",
    summary = "List model groups",
    params(ListModelGroupsQuery),
    responses(
        (status = 200, description = "Groups with their entries", body = Vec<ModelGroupResponse>),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_model_groups(
    State(state): State<AppState>,
    Query(query): Query<ListModelGroupsQuery>,
) -> Result<Json<Vec<ModelGroupResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = ModelGroups::new(&mut conn);

    let mut filter = ModelGroupFilter::new(query.skip, query.limit);
    if let Some(search) = query.search {
        filter = filter.with_search(search);
    }

    let groups = repo.list(&filter).await?;
    let mut result = Vec::with_capacity(groups.len());
    for group in groups {
        let entries = repo.entries(group.id).await?;
        result.push(ModelGroupResponse::from_parts(group, entries));
    }

    Ok(Json(result))
}

/// Get a model group by name
#[utoipa::path(
    get,
    path = "/model-groups/{name}",
    tag = "model-groups",
    summary = "Get a model group by name",
    params(("name" = String, Path, description = "Group name")),
    responses(
        (status = 200, description = "Group with entries", body = ModelGroupResponse),
        (status = 404, description = "Group not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_model_group(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<ModelGroupResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = ModelGroups::new(&mut conn);

    let group = repo.get_by_name(&name).await?.ok_or(Error::UnknownModelGroup { name })?;
    let entries = repo.entries(group.id).await?;

    Ok(Json(ModelGroupResponse::from_parts(group, entries)))
}

/// Update a model group
#[utoipa::path(
    patch,
    path = "/model-groups/{name}",
    tag = "model-groups",
    summary = "Update a model group's name or description",
    params(("name" = String, Path, description = "Group name")),
    request_body = ModelGroupUpdate,
    responses(
        (status = 200, description = "Updated group", body = ModelGroupResponse),
        (status = 404, description = "Group not found"),
        (status = 409, description = "A group with the new name already exists"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_model_group(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(data): Json<ModelGroupUpdate>,
) -> Result<Json<ModelGroupResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = ModelGroups::new(&mut conn);

    let group = repo.get_by_name(&name).await?.ok_or(Error::UnknownModelGroup { name })?;

    let updated = repo
        .update(
            group.id,
            &ModelGroupUpdateDBRequest {
                name: data.name,
                description: data.description.map(Some),
            },
        )
        .await?;
    let entries = repo.entries(updated.id).await?;

    Ok(Json(ModelGroupResponse::from_parts(updated, entries)))
}

/// Delete a model group
#[utoipa::path(
    delete,
    path = "/model-groups/{name}",
    tag = "model-groups",
    summary = "Delete a model group and its entries",
    params(("name" = String, Path, description = "Group name")),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 404, description = "Group not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_model_group(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = ModelGroups::new(&mut conn);

    let group = repo.get_by_name(&name).await?.ok_or(Error::UnknownModelGroup { name })?;
    repo.delete(group.id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Replace a group's entries
#[utoipa::path(
    put,
    path = "/model-groups/{name}/entries",
    tag = "model-groups",
    summary = "Replace a group's candidate entries",
    params(("name" = String, Path, description = "Group name")),
    request_body = ModelGroupEntriesUpdate,
    responses(
        (status = 200, description = "Group with replaced entries", body = ModelGroupResponse),
        (status = 404, description = "Group not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn set_model_group_entries(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(data): Json<ModelGroupEntriesUpdate>,
) -> Result<Json<ModelGroupResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = ModelGroups::new(&mut conn);

    let group = repo.get_by_name(&name).await?.ok_or(Error::UnknownModelGroup { name })?;
    let entries = repo
        .set_entries(group.id, data.entries.into_iter().map(Into::into).collect())
        .await?;

    Ok(Json(ModelGroupResponse::from_parts(group, entries)))
}

/// Resolve a group to its candidates
#[utoipa::path(
    get,
    path = "/model-groups/{name}/resolution",
    tag = "model-groups",
    summary = "Resolve a group to its candidate models in fallback order",
    params(("name" = String, Path, description = "Group name")),
    responses(
        (status = 200, description = "Candidates by ascending priority", body = ResolutionResponse),
        (status = 404, description = "Group not found"),
        (status = 409, description = "Group has no active entries"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn resolve_model_group(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<ResolutionResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = ModelGroups::new(&mut conn);

    let entries = match repo.resolve(&name).await? {
        None => return Err(Error::UnknownModelGroup { name }),
        Some(entries) if entries.is_empty() => return Err(Error::NoActiveModels { name }),
        Some(entries) => entries,
    };

    Ok(Json(ResolutionResponse {
        group: name,
        candidates: entries.into_iter().map(|e| e.model_name).collect(),
    }))
}
