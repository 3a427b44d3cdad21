use crate::api::AppState;
use crate::domain::Decimal;
use crate::error::AppError;
use crate::oracle::PriceObservation;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub active_positions: u64,
    pub total_collateral: Decimal,
    pub total_debt: Decimal,
    /// Aggregate debt-to-collateral percentage over active positions.
    pub system_health_ratio: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<PriceObservation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral_value: Option<Decimal>,
    /// Collateral value over debt, as a percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_collateral_ratio: Option<Decimal>,
}

pub async fn get_metrics(State(state): State<AppState>) -> Result<Json<MetricsResponse>, AppError> {
    let totals = async { state.repo.active_totals().await.map_err(AppError::from) };
    let price = async {
        match &state.oracle {
            Some(oracle) => oracle.read().await.map(Some).map_err(AppError::from),
            None => Ok(None),
        }
    };
    let (totals, price) = futures::try_join!(totals, price)?;

    let collateral_value = price
        .map(|p| {
            totals.coll.checked_mul(p.price).ok_or_else(|| {
                AppError::Internal("collateral value overflows decimal range".to_string())
            })
        })
        .transpose()?;
    let total_collateral_ratio = collateral_value
        .filter(|_| !totals.debt.is_zero())
        .map(|value| Decimal::health_ratio(value, totals.debt));

    Ok(Json(MetricsResponse {
        active_positions: totals.count,
        total_collateral: totals.coll,
        total_debt: totals.debt,
        system_health_ratio: Decimal::health_ratio(totals.debt, totals.coll),
        price,
        collateral_value,
        total_collateral_ratio,
    }))
}
