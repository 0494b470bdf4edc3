//! Auxiliary HTTP surface of the collector.
//!
//! Serves the exception list agents fold into their capture filters, plus
//! a JSON snapshot of the endpoint registry for operators.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use crate::error_handling::types::CollectorError;
use crate::registry::EndpointRegistry;

pub struct ExceptionServer {
    public_dir: PathBuf,
    registry: Arc<EndpointRegistry>,
}

impl ExceptionServer {
    pub fn new(public_dir: PathBuf, registry: Arc<EndpointRegistry>) -> Self {
        ExceptionServer {
            public_dir,
            registry,
        }
    }

    /// Serves until the process exits.
    pub async fn start(&self, bind_address: &str, port: u16) -> Result<(), CollectorError> {
        let ip: IpAddr = bind_address.parse().map_err(|_| {
            CollectorError::BindError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("bad bind address {}", bind_address),
            ))
        })?;
        let addr = SocketAddr::new(ip, port);

        info!("exception list service listening on {}", addr);
        warp::serve(Self::routes(self.public_dir.clone(), self.registry.clone()))
            .run(addr)
            .await;
        Ok(())
    }

    fn routes(
        public_dir: PathBuf,
        registry: Arc<EndpointRegistry>,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        // GET /exceptions.list -> newline-delimited hosts/domains
        let exceptions = warp::path("exceptions.list")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let path = public_dir.join("exceptions.list");
                async move {
                    match tokio::fs::read_to_string(&path).await {
                        Ok(body) => Ok::<_, Rejection>(
                            reply::with_status(body, StatusCode::OK).into_response(),
                        ),
                        Err(_) => Ok::<_, Rejection>(
                            reply::with_status(
                                "exception list unavailable".to_string(),
                                StatusCode::NOT_FOUND,
                            )
                            .into_response(),
                        ),
                    }
                }
            });

        // GET /endpoints -> registry snapshot
        let endpoints = warp::path("endpoints")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || reply::json(&registry.snapshot()));

        exceptions.or(endpoints)
    }
}
