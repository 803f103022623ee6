// Priority queue ticketing: fair-access admission queue per sale

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::models::{parse_uuid, NewTicket, QueueTicket, TicketStatus, WalletAddress};
use crate::store::Store;
use crate::AppState;

/// How long a ticket stays valid after joining
pub const TICKET_TTL_SECS: i64 = 15 * 60;
/// Average time each position ahead is expected to take
pub const AVG_SERVICE_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    #[default]
    Join,
    Status,
    Leave,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct QueueQuery {
    pub action: Option<QueueAction>,
    pub ticket_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct QueueBody {
    pub wallet_address: Option<String>,
    pub project_id: Option<String>,
    pub ticket_id: Option<String>,
}

/// Validated queue request, one variant per action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueRequest {
    Join { wallet: WalletAddress, project_id: Uuid },
    Status { ticket_id: Uuid },
    Leave { ticket_id: Uuid },
}

impl QueueRequest {
    pub fn from_parts(query: QueueQuery, body: QueueBody) -> Result<Self, ApiError> {
        match query.action.unwrap_or_default() {
            QueueAction::Join => {
                let wallet = body
                    .wallet_address
                    .as_deref()
                    .map(str::trim)
                    .filter(|w| !w.is_empty())
                    .ok_or_else(|| {
                        ApiError::BadRequest("walletAddress and projectId are required".to_string())
                    })?;
                if body.project_id.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                    return Err(ApiError::BadRequest(
                        "walletAddress and projectId are required".to_string(),
                    ));
                }
                Ok(QueueRequest::Join {
                    wallet: WalletAddress::parse(wallet)?,
                    project_id: parse_uuid("projectId", body.project_id.as_deref())?,
                })
            }
            QueueAction::Status => Ok(QueueRequest::Status {
                ticket_id: parse_uuid("ticketId", query.ticket_id.as_deref())?,
            }),
            QueueAction::Leave => {
                let raw = body.ticket_id.as_deref().or(query.ticket_id.as_deref());
                Ok(QueueRequest::Leave {
                    ticket_id: parse_uuid("ticketId", raw)?,
                })
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinResponse {
    pub ticket_id: Uuid,
    pub position: i64,
    pub priority: bool,
    pub eta_seconds: i64,
    pub expires_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: TicketStatus,
    pub position: i64,
    pub priority: bool,
    pub eta_seconds: i64,
    pub expires_at: DateTime<Utc>,
}

pub fn eta_seconds(position: i64) -> i64 {
    position * AVG_SERVICE_SECS
}

/// Current rank of a ticket among the waiting tickets of its project.
///
/// Derived at read time, so it shrinks as tickets ahead leave or expire.
async fn rank(store: &dyn Store, ticket: &QueueTicket) -> Result<i64, ApiError> {
    let ahead = store.count_waiting_ahead(ticket.project_id, ticket.position).await?;
    Ok(ahead + 1)
}

/// Queue endpoint dispatched on `?action=join|status|leave`
pub async fn handle_queue(
    State(state): State<Arc<AppState>>,
    query: Result<Query<QueueQuery>, QueryRejection>,
    JsonBody(body): JsonBody<QueueBody>,
) -> Result<Response, ApiError> {
    let Query(query) = query
        .map_err(|e| ApiError::BadRequest(format!("Invalid query string: {}", e.body_text())))?;

    let response = match QueueRequest::from_parts(query, body)? {
        QueueRequest::Join { wallet, project_id } => {
            Json(join(state.store.as_ref(), wallet, project_id, Utc::now()).await?).into_response()
        }
        QueueRequest::Status { ticket_id } => {
            Json(status(state.store.as_ref(), ticket_id).await?).into_response()
        }
        QueueRequest::Leave { ticket_id } => {
            leave(state.store.as_ref(), ticket_id).await?;
            Json(json!({ "success": true })).into_response()
        }
    };

    Ok(response)
}

pub async fn join(
    store: &dyn Store,
    wallet: WalletAddress,
    project_id: Uuid,
    now: DateTime<Utc>,
) -> Result<JoinResponse, ApiError> {
    if let Some(existing) = store.find_waiting_ticket(&wallet, project_id).await? {
        let position = rank(store, &existing).await?;
        info!(
            "Queue: {} already waiting for project {} (ticket {})",
            wallet, project_id, existing.id
        );
        return Ok(JoinResponse {
            ticket_id: existing.id,
            position,
            priority: existing.priority,
            eta_seconds: eta_seconds(position),
            expires_at: existing.expires_at,
            message: "Already in queue".to_string(),
        });
    }

    let priority = store.is_priority_whitelisted(&wallet, project_id).await?;
    let ticket = store
        .insert_ticket(&NewTicket {
            id: Uuid::new_v4(),
            wallet_address: wallet.clone(),
            project_id,
            priority,
            created_at: now,
            expires_at: now + Duration::seconds(TICKET_TTL_SECS),
        })
        .await?;

    let position = rank(store, &ticket).await?;
    info!(
        "Queue: {} joined project {} at position {} (ticket {}, priority={})",
        wallet, project_id, position, ticket.id, ticket.priority
    );

    let message = if ticket.priority {
        format!("Joined priority queue at position {}", position)
    } else {
        format!("Joined queue at position {}", position)
    };

    Ok(JoinResponse {
        ticket_id: ticket.id,
        position,
        priority: ticket.priority,
        eta_seconds: eta_seconds(position),
        expires_at: ticket.expires_at,
        message,
    })
}

pub async fn status(store: &dyn Store, ticket_id: Uuid) -> Result<StatusResponse, ApiError> {
    let ticket = store
        .get_ticket(ticket_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Ticket not found: {}", ticket_id)))?;
    let position = rank(store, &ticket).await?;

    Ok(StatusResponse {
        status: ticket.status,
        position,
        priority: ticket.priority,
        eta_seconds: eta_seconds(position),
        expires_at: ticket.expires_at,
    })
}

pub async fn leave(store: &dyn Store, ticket_id: Uuid) -> Result<(), ApiError> {
    if !store.expire_ticket(ticket_id).await? {
        return Err(ApiError::NotFound(format!("Ticket not found: {}", ticket_id)));
    }
    info!("Queue: ticket {} left", ticket_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "0x2222222222222222222222222222222222222222";

    fn query(action: Option<QueueAction>, ticket_id: Option<&str>) -> QueueQuery {
        QueueQuery {
            action,
            ticket_id: ticket_id.map(str::to_string),
        }
    }

    #[test]
    fn test_default_action_is_join() {
        let project = Uuid::new_v4();
        let body = QueueBody {
            wallet_address: Some(WALLET.to_uppercase().replacen("0X", "0x", 1)),
            project_id: Some(project.to_string()),
            ticket_id: None,
        };
        let req = QueueRequest::from_parts(query(None, None), body).unwrap();
        assert_eq!(
            req,
            QueueRequest::Join {
                wallet: WalletAddress::parse(WALLET).unwrap(),
                project_id: project,
            }
        );
    }

    #[test]
    fn test_join_requires_wallet_and_project() {
        let body = QueueBody {
            wallet_address: Some(WALLET.to_string()),
            ..Default::default()
        };
        assert!(matches!(
            QueueRequest::from_parts(query(Some(QueueAction::Join), None), body),
            Err(ApiError::BadRequest(_))
        ));
        let body = QueueBody {
            project_id: Some(Uuid::new_v4().to_string()),
            ..Default::default()
        };
        assert!(QueueRequest::from_parts(query(None, None), body).is_err());
    }

    #[test]
    fn test_status_reads_ticket_from_query() {
        let ticket = Uuid::new_v4();
        let req = QueueRequest::from_parts(
            query(Some(QueueAction::Status), Some(&ticket.to_string())),
            QueueBody::default(),
        )
        .unwrap();
        assert_eq!(req, QueueRequest::Status { ticket_id: ticket });
        assert!(
            QueueRequest::from_parts(query(Some(QueueAction::Status), None), QueueBody::default())
                .is_err()
        );
    }

    #[test]
    fn test_leave_reads_ticket_from_body() {
        let ticket = Uuid::new_v4();
        let body = QueueBody {
            ticket_id: Some(ticket.to_string()),
            ..Default::default()
        };
        let req = QueueRequest::from_parts(query(Some(QueueAction::Leave), None), body).unwrap();
        assert_eq!(req, QueueRequest::Leave { ticket_id: ticket });
    }

    #[test]
    fn test_eta() {
        assert_eq!(eta_seconds(1), 30);
        assert_eq!(eta_seconds(4), 120);
    }
}
