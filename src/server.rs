//! HTTP control surface, mounted under `/api/v1`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::Future;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::controller::Controller;
use crate::models::{Light, Sequence, SequenceState};
use crate::store::StoreError;

/// Build the `/api/v1` route tree
pub fn routes(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let with_controller = warp::any().map(move || controller.clone());

    let light = warp::path!("light")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller.clone())
        .and_then(set_light);

    let list = warp::path!("sequence")
        .and(warp::get())
        .and(with_controller.clone())
        .and_then(list_sequences);

    let add = warp::path!("sequence")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller.clone())
        .and_then(add_sequence);

    let get_one = warp::path!("sequence" / String)
        .and(warp::get())
        .and(with_controller.clone())
        .and_then(get_sequence);

    let delete_one = warp::path!("sequence" / String)
        .and(warp::delete())
        .and(with_controller.clone())
        .and_then(delete_sequence);

    let state = warp::path!("seqctrl")
        .and(warp::get())
        .and(with_controller.clone())
        .and_then(get_sequence_state);

    let set_state = warp::path!("seqctrl")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller)
        .and_then(set_sequence_state);

    warp::path("api").and(warp::path("v1")).and(
        light
            .or(list)
            .or(add)
            .or(get_one)
            .or(delete_one)
            .or(state)
            .or(set_state),
    )
}

/// Bind the listening socket and return the serve future
pub async fn bind(
    port: u16,
    controller: Arc<Controller>,
) -> Result<impl Future<Output = ()>, std::io::Error> {
    let address = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(address).await?;

    info!(address = %address, "milightd listening");

    Ok(
        warp::serve(routes(controller).with(warp::filters::log::log("milightd::server")))
            .run_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener)),
    )
}

async fn set_light(light: Light, controller: Arc<Controller>) -> Result<Response, Infallible> {
    if controller.process(false, &light).await {
        Ok(StatusCode::OK.into_response())
    } else {
        Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR))
    }
}

async fn list_sequences(controller: Arc<Controller>) -> Result<Response, Infallible> {
    Ok(match controller.get_sequences().await {
        Ok(sequences) => warp::reply::json(&sequences).into_response(),
        Err(error) => store_error_reply(error),
    })
}

async fn add_sequence(seq: Sequence, controller: Arc<Controller>) -> Result<Response, Infallible> {
    if let Err(error) = controller.add_sequence(&seq).await {
        return Ok(store_error_reply(error));
    }

    // Echo the stored document back to the caller
    Ok(match controller.get_sequence(&seq.name).await {
        Ok(stored) => {
            warp::reply::with_status(warp::reply::json(&stored), StatusCode::CREATED)
                .into_response()
        }
        Err(error) => store_error_reply(error),
    })
}

async fn get_sequence(name: String, controller: Arc<Controller>) -> Result<Response, Infallible> {
    Ok(match controller.get_sequence(&name).await {
        Ok(seq) => warp::reply::json(&seq).into_response(),
        Err(error) => store_error_reply(error),
    })
}

async fn delete_sequence(
    name: String,
    controller: Arc<Controller>,
) -> Result<Response, Infallible> {
    Ok(match controller.delete_sequence(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => store_error_reply(error),
    })
}

async fn get_sequence_state(controller: Arc<Controller>) -> Result<Response, Infallible> {
    Ok(warp::reply::json(&controller.get_sequence_state().await).into_response())
}

async fn set_sequence_state(
    state: SequenceState,
    controller: Arc<Controller>,
) -> Result<Response, Infallible> {
    Ok(match controller.set_sequence_state(state).await {
        Ok(new_state) => warp::reply::json(&new_state).into_response(),
        Err(error) => store_error_reply(error),
    })
}

fn store_error_reply(error: StoreError) -> Response {
    match error {
        StoreError::NotFound(_) => {
            warp::reply::with_status("sequence not found", StatusCode::NOT_FOUND).into_response()
        }
        StoreError::InvalidName(_) => {
            warp::reply::with_status("bad request", StatusCode::BAD_REQUEST).into_response()
        }
        error => {
            error!(error = %error, "store error");
            error_reply(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn error_reply(status: StatusCode) -> Response {
    warp::reply::with_status("milightd error", status).into_response()
}
