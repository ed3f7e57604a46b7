use actix_web::web;
use rusqlite::Connection;
use std::future::Future;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::DbPool;

/// Runs `f` with a pooled connection on the blocking thread pool.
pub async fn with_conn<T, F>(pool: &web::Data<DbPool>, f: F) -> ApiResult<T>
where
    F: FnOnce(&mut Connection) -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    web::block(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await?
}

/// Races `fut` against `limit`. Expiry becomes a 504 naming `what`.
pub async fn race_timeout<T, Fut>(limit: Duration, what: &str, fut: Fut) -> ApiResult<T>
where
    Fut: Future<Output = ApiResult<T>>,
{
    match actix_web::rt::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("{} exceeded {}s", what, limit.as_secs());
            Err(ApiError::Timeout(what.to_string()))
        }
    }
}

/// `with_conn` bounded by `limit`. The query keeps running on its thread after expiry,
/// only the response is given up.
pub async fn with_conn_timeout<T, F>(pool: &web::Data<DbPool>, limit: Duration, what: &str, f: F) -> ApiResult<T>
where
    F: FnOnce(&mut Connection) -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    race_timeout(limit, what, with_conn(pool, f)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn slow_future_times_out() {
        let slow = async {
            actix_web::rt::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ApiError>(1)
        };
        let err = race_timeout(Duration::from_millis(10), "Report query", slow).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout(ref what) if what == "Report query"));
    }

    #[actix_web::test]
    async fn fast_future_passes_through() {
        let value = race_timeout(Duration::from_secs(1), "Report query", async { Ok::<_, ApiError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[actix_web::test]
    async fn with_conn_uses_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::setup::db_setup::create_pool(&dir.path().join("t.db")).unwrap();
        let pool = web::Data::new(pool);
        let one: i64 = with_conn(&pool, |conn| Ok(conn.query_row("SELECT 1", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(one, 1);
    }
}
