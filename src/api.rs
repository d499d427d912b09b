use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use log::{info, warn};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::scale::traits::Buzzer;

fn with_scale(scale: Arc<dyn Buzzer>) -> impl Filter<Extract = (Arc<dyn Buzzer>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&scale))
}

async fn handle_toggle_buzzer(scale: Arc<dyn Buzzer>) -> Result<impl Reply, Rejection> {
    match scale.toggle_buzzing_on_touch().await {
        Ok(()) => Ok(warp::reply::with_status(String::new(), StatusCode::OK)),
        Err(err) => {
            warn!("Failed to toggle buzzer: {}", err);
            Ok(warp::reply::with_status(err.to_string(), StatusCode::INTERNAL_SERVER_ERROR))
        },
    }
}

/// `POST /toggle_buzzer`
pub fn routes(scale: Arc<dyn Buzzer>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("toggle_buzzer")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_scale(scale))
        .and_then(handle_toggle_buzzer)
}

/// Binds the HTTP surface to `addr`. The returned server runs until `shutdown` resolves.
pub fn bind<S>(scale: Arc<dyn Buzzer>, addr: SocketAddr, shutdown: S) -> Result<(SocketAddr, impl Future<Output = ()>), warp::Error>
where
    S: Future<Output = ()> + Send + 'static,
{
    let (bound, server) = warp::serve(routes(scale)).try_bind_with_graceful_shutdown(addr, shutdown)?;
    info!("Listening on http://{}", bound);
    Ok((bound, server))
}
