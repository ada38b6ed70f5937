//! OpenAPI documentation assembly.

use crate::api::{handlers, models};
use crate::db::models::credits::CreditTransactionType;
use crate::db::models::jobs::{CompletionStatus, JobStatus};
use crate::proxy::client::{ChatMessage, ChatParams, Role};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "tollgate",
        description = "Job & credit accounting engine for LLM proxy deployments"
    ),
    paths(
        handlers::jobs::create_job,
        handlers::jobs::get_job,
        handlers::jobs::list_jobs,
        handlers::jobs::list_job_calls,
        handlers::jobs::complete_job,
        handlers::proxy::job_chat_completions,
        handlers::model_groups::create_model_group,
        handlers::model_groups::list_model_groups,
        handlers::model_groups::get_model_group,
        handlers::model_groups::update_model_group,
        handlers::model_groups::delete_model_group,
        handlers::model_groups::set_model_group_entries,
        handlers::model_groups::resolve_model_group,
        handlers::credits::get_balance,
        handlers::credits::create_allocation,
        handlers::credits::create_deduction,
        handlers::credits::create_refund,
        handlers::credits::create_adjustment,
        handlers::credits::set_refill_policy,
        handlers::credits::list_team_transactions,
    ),
    components(schemas(
        models::jobs::JobCreate,
        models::jobs::JobComplete,
        models::jobs::JobResponse,
        models::jobs::CompletionSummaryResponse,
        models::jobs::LlmCallResponse,
        models::model_groups::ModelGroupCreate,
        models::model_groups::ModelGroupUpdate,
        models::model_groups::ModelGroupEntriesUpdate,
        models::model_groups::ModelGroupEntryCreate,
        models::model_groups::ModelGroupResponse,
        models::model_groups::ModelGroupEntryResponse,
        models::model_groups::ResolutionResponse,
        models::credits::AllocationCreate,
        models::credits::DeductionCreate,
        models::credits::RefundCreate,
        models::credits::AdjustmentCreate,
        models::credits::RefillPolicyUpdate,
        models::credits::BalanceResponse,
        models::credits::CreditTransactionResponse,
        models::proxy::ProxyChatRequest,
        models::proxy::ProxyChatResponse,
        models::proxy::ProxyUsageResponse,
        ChatMessage,
        ChatParams,
        Role,
        JobStatus,
        CompletionStatus,
        CreditTransactionType,
    ))
)]
pub struct ApiDoc;
