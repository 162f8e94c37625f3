use chrono::Utc;
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::gps_processor::LocationSample;
use crate::journey_data::JourneyHeader;
use crate::map_renderer::RenderResult;
use crate::raw_data::RawDataFile;

#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    OnLocationUpdate(LocationSample),
    OnLocationUpdates(Vec<LocationSample>),
    FinalizeOngoingJourney,
    TryAutoFinalizeJourney,
    HasOngoingJourney,
    ListAllJourneys,
    GetCoverageArea,
    GetJourneyArea(String),
    RenderMapOverlay {
        zoom: f32,
        left: f64,
        top: f64,
        right: f64,
        bottom: f64,
    },
    ResetMapRenderer,
    ToggleRawDataMode(bool),
    GetRawDataMode,
    ListAllRawData,
    DeleteRawDataFile(String),
    Flush,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Done,
    CoverageChanged(bool),
    JourneyId(Option<String>),
    Bool(bool),
    Journeys(Vec<JourneyHeader>),
    Area(Option<u64>),
    Rendered(RenderResult),
    RawDataFiles(Vec<RawDataFile>),
}

struct Envelope {
    request: Request,
    reply: oneshot::Sender<Result<Response>>,
}

fn handle(engine: &Engine, request: Request) -> Result<Response> {
    match request {
        Request::OnLocationUpdate(sample) => {
            engine.on_location_update(sample).map(Response::CoverageChanged)
        }
        Request::OnLocationUpdates(samples) => engine
            .on_location_updates(samples)
            .map(Response::CoverageChanged),
        Request::FinalizeOngoingJourney => {
            engine.finalize_ongoing_journey().map(Response::JourneyId)
        }
        Request::TryAutoFinalizeJourney => engine
            .try_auto_finalize_journey(Utc::now())
            .map(Response::JourneyId),
        Request::HasOngoingJourney => engine.has_ongoing_journey().map(Response::Bool),
        Request::ListAllJourneys => engine.list_all_journeys().map(Response::Journeys),
        Request::GetCoverageArea => Ok(Response::Area(Some(engine.get_coverage_area()))),
        Request::GetJourneyArea(id) => engine.get_journey_area(&id).map(Response::Area),
        Request::RenderMapOverlay {
            zoom,
            left,
            top,
            right,
            bottom,
        } => engine
            .render_map_overlay(zoom, left, top, right, bottom)
            .map(Response::Rendered),
        Request::ResetMapRenderer => {
            engine.reset_map_renderer();
            Ok(Response::Done)
        }
        Request::ToggleRawDataMode(enable) => {
            engine.toggle_raw_data_mode(enable).map(|()| Response::Done)
        }
        Request::GetRawDataMode => Ok(Response::Bool(engine.get_raw_data_mode())),
        Request::ListAllRawData => engine.list_all_raw_data().map(Response::RawDataFiles),
        Request::DeleteRawDataFile(name) => engine
            .delete_raw_data_file(&name)
            .map(|()| Response::Done),
        Request::Flush => engine.flush().map(|()| Response::Done),
    }
}

/// Runs requests against an `Engine` on a dedicated worker thread, in the
/// order they were submitted. Every request gets exactly one reply.
pub struct Service {
    sender: Option<mpsc::UnboundedSender<Envelope>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Service {
    pub fn start(engine: Arc<Engine>) -> Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Envelope>();
        let worker = thread::Builder::new()
            .name("trailmap-service".to_string())
            .spawn(move || {
                while let Some(Envelope { request, reply }) = receiver.blocking_recv() {
                    debug!("[service] handling {:?}", request);
                    let result = handle(&engine, request);
                    if let Err(e) = &result {
                        warn!("[service] request failed: {}", e);
                    }
                    // the caller may have stopped waiting
                    let _ = reply.send(result);
                }
                info!("[service] worker stopped");
            })?;
        Ok(Service {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn submit(&self, request: Request) -> oneshot::Receiver<Result<Response>> {
        let (reply, receiver) = oneshot::channel();
        let envelope = Envelope { request, reply };
        let sent = match &self.sender {
            Some(sender) => sender.send(envelope).map_err(|e| e.0),
            None => Err(envelope),
        };
        if let Err(envelope) = sent {
            let _ = envelope.reply.send(Err(Error::ServiceStopped));
        }
        receiver
    }

    pub async fn call(&self, request: Request) -> Result<Response> {
        self.submit(request)
            .await
            .unwrap_or(Err(Error::ServiceStopped))
    }

    /// Must not be called from inside an async runtime.
    pub fn call_blocking(&self, request: Request) -> Result<Response> {
        self.submit(request)
            .blocking_recv()
            .unwrap_or(Err(Error::ServiceStopped))
    }

    /// Lets queued requests finish, then waits for the worker to exit.
    /// Requests submitted afterwards fail with `ServiceStopped`.
    pub fn shutdown(&mut self) {
        self.sender = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("[service] worker panicked");
            }
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.shutdown();
    }
}
