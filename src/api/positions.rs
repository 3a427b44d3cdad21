use crate::api::AppState;
use crate::db::PositionFilter;
use crate::domain::{Address, Decimal, Position, PositionStatus};
use crate::error::AppError;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct PositionsQuery {
    pub wallet: Option<String>,
    pub asset: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PositionsResponse {
    pub positions: Vec<PositionSummaryDto>,
}

/// Current state without the history trail.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSummaryDto {
    pub position_id: i64,
    pub wallet: Address,
    pub asset: Address,
    pub coll: Decimal,
    pub debt: Decimal,
    pub health_ratio: Decimal,
    pub status: PositionStatus,
    pub block_number: u64,
}

impl From<Position> for PositionSummaryDto {
    fn from(p: Position) -> Self {
        Self {
            position_id: p.position_id,
            wallet: p.wallet,
            asset: p.asset,
            coll: p.coll,
            debt: p.debt,
            health_ratio: p.health_ratio,
            status: p.status,
            block_number: p.block_number,
        }
    }
}

fn parse_address(field: &str, raw: Option<&str>) -> Result<Option<Address>, AppError> {
    raw.map(|s| {
        Address::from_str(s).map_err(|_| AppError::BadRequest(format!("Invalid {} address", field)))
    })
    .transpose()
}

pub async fn list_positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<PositionsResponse>, AppError> {
    let filter = PositionFilter {
        wallet: parse_address("wallet", params.wallet.as_deref())?,
        asset: parse_address("asset", params.asset.as_deref())?,
        status: params
            .status
            .as_deref()
            .map(PositionStatus::from_str)
            .transpose()
            .map_err(AppError::BadRequest)?,
    };

    let positions = state.repo.list_positions(&filter).await?;
    Ok(Json(PositionsResponse {
        positions: positions.into_iter().map(PositionSummaryDto::from).collect(),
    }))
}

pub async fn get_position(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Position>, AppError> {
    state
        .repo
        .position(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("position {}", id)))
}
