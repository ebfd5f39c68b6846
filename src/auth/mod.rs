pub mod jwt;
pub mod signature;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;

use crate::{error::AppError, state::AppState};

use self::signature::constant_time_eq;

/// Header set by the hosting platform's scheduler on cron invocations.
pub const PLATFORM_CRON_HEADER: &str = "x-vercel-cron";

/// Guards the cron and metrics endpoints: `Authorization: Bearer $CRON_SECRET`,
/// or the scheduler header when the deployment trusts it.
#[derive(Debug, Clone, Copy)]
pub struct CronAuth;

#[async_trait]
impl FromRequestParts<AppState> for CronAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.config.cron_trust_platform_header
            && parts.headers.contains_key(PLATFORM_CRON_HEADER)
        {
            return Ok(CronAuth);
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        if constant_time_eq(bearer.token(), &state.config.cron_secret) {
            Ok(CronAuth)
        } else {
            Err(AppError::unauthorized())
        }
    }
}
