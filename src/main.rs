use dotenv::dotenv;
use log::*;

use std::io;
use std::sync::Arc;

mod api_models;
mod broadcast;
mod config;
mod models;
mod room;
mod schema;
mod store;

use crate::config::Config;
use crate::room::Rooms;
use crate::store::{DurableStore, MemoryStore, SqlStore};

/**
 * Struct for carrying application state into tide request handlers
 */
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<Rooms>,
}

impl AppState {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            rooms: Arc::new(Rooms::new(store)),
        }
    }
}

/**
 * Pick the durable store for rooms, falling back to memory when there is no
 * database configured
 */
async fn create_store(config: &Config) -> Result<Arc<dyn DurableStore>, store::StoreError> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(
            SqlStore::connect(url, config.max_connections).await?,
        )),
        None => {
            warn!("DATABASE_URL is not set, polls will not survive a restart");
            Ok(Arc::new(MemoryStore::default()))
        }
    }
}

/**
 * The routes module contains all the tide routes and the logic to fulfill the responses for each
 * route.
 *
 * Modules are nested for cleaner organization here
 */
mod routes {
    use tide::Request;
    use tide_websockets::WebSocket;

    use crate::AppState;

    pub fn app(state: AppState) -> tide::Server<AppState> {
        let mut app = tide::with_state(state);
        app.at("/").get(index);
        app.at("/party").post(rooms::create_room);
        app.at("/party/:room")
            .with(WebSocket::new(rooms::socket))
            .post(rooms::create)
            .all(rooms::read);
        app
    }

    /**
    *  GET /
    */
    pub async fn index(req: Request<AppState>) -> Result<String, tide::Error> {
        Ok(format!("Wilkommen, {} rooms open", req.state().rooms.len().await))
    }

    pub mod rooms {
        use futures_util::StreamExt;
        use log::*;
        use tide::{Body, Request, Response, StatusCode};
        use tide_websockets::{Message, WebSocketConnection};
        use uuid::Uuid;

        use crate::api_models::CreatedRoom;
        use crate::models::{InsertablePoll, Poll};
        use crate::room::RoomError;
        use crate::AppState;

        async fn poll_from_body(req: &mut Request<AppState>) -> Result<InsertablePoll, tide::Error> {
            req.body_json::<InsertablePoll>().await.map_err(|err| {
                debug!("Unreadable poll: {:?}", err);
                tide::Error::from_str(StatusCode::BadRequest, "Invalid poll")
            })
        }

        fn created(result: Result<Poll, RoomError>) -> Result<Poll, tide::Error> {
            match result {
                Ok(poll) => Ok(poll),
                Err(RoomError::Poll(err)) => {
                    Err(tide::Error::from_str(StatusCode::BadRequest, err.to_string()))
                }
                Err(err) => {
                    error!("Failed to create poll: {:?}", err);
                    Err(tide::Error::from_str(StatusCode::InternalServerError, "Failed to create"))
                }
            }
        }

        /**
        *  POST /party
        *
        *  Create a poll in a brand new room
        */
        pub async fn create_room(mut req: Request<AppState>) -> Result<Response, tide::Error> {
            let poll = poll_from_body(&mut req).await?;
            let id = Uuid::new_v4().to_string();
            let room = req.state().rooms.room(&id).await;
            let poll = created(room.create(poll).await)?;

            Ok(Response::builder(StatusCode::Created)
                .body(Body::from_json(&CreatedRoom { id, poll })?)
                .build())
        }

        /**
        *  POST /party/:room
        */
        pub async fn create(mut req: Request<AppState>) -> Result<Response, tide::Error> {
            let poll = poll_from_body(&mut req).await?;
            let room = req.state().rooms.room(req.param("room")?).await;
            let poll = created(room.create(poll).await)?;

            Ok(Response::builder(StatusCode::Ok)
                .body(Body::from_json(&poll)?)
                .build())
        }

        /**
        *  Any other method on /party/:room
        */
        pub async fn read(req: Request<AppState>) -> Result<Response, tide::Error> {
            let poll = match req.state().rooms.find(req.param("room")?).await? {
                Some(room) => room.snapshot().await?,
                None => None,
            };

            match poll {
                Some(poll) => Ok(Response::builder(StatusCode::Ok)
                    .body(Body::from_json(&poll)?)
                    .build()),
                None => Ok(Response::builder(StatusCode::NotFound)
                    .body("Not found")
                    .build()),
            }
        }

        /**
        *  Websocket upgrade on /party/:room
        */
        pub async fn socket(
            req: Request<AppState>,
            mut stream: WebSocketConnection,
        ) -> Result<(), tide::Error> {
            let room = req.state().rooms.room(req.param("room")?).await;
            let id = Uuid::new_v4();
            room.connect(id, Box::new(stream.clone())).await?;
            info!("{} connected to room {}", id, room.id());

            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Err(err) = room.message(text).await {
                            error!("Room {} went away: {}", room.id(), err);
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        debug!("Connection {} failed: {:?}", id, err);
                        break;
                    }
                }
            }

            room.disconnect(id).await?;
            info!(
                "{} disconnected from room {}, {} still connected",
                id,
                room.id(),
                room.subscribers().await?
            );
            Ok(())
        }
    }
}

#[async_std::main]
async fn main() -> Result<(), io::Error> {
    dotenv().ok();
    pretty_env_logger::init();

    let config = Config::from_env().map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    match create_store(&config).await {
        Ok(store) => {
            let app = routes::app(AppState::new(store));
            info!("Listening on {}", config.listen);
            app.listen(config.listen).await?;
            Ok(())
        }
        Err(err) => {
            error!("Could not initialize room storage! {:?}", err);
            Err(io::Error::new(io::ErrorKind::Other, err))
        }
    }
}
