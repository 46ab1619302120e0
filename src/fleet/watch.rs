use super::FleetManager;
use crate::error::{FleetError, Result};
use corral_connect::ControllerConn;
use corral_core_interface::{EntityPath, Identity, ModelSummary, SummaryStream};
use corral_core_pubsub::{Hub, Subscription};
use corral_store::StoreSession;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A running model-summary watch.
///
/// The watch ends when it is stopped, when the token it was started with is
/// cancelled, or when the controller stream ends. The last case is an error:
/// [`SummaryWatch::wait`] returns [`FleetError::WatchTerminated`].
pub struct SummaryWatch {
    controller: EntityPath,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl SummaryWatch {
    pub fn controller(&self) -> &EntityPath {
        &self.controller
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the watch and waits for its task to exit.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.wait().await
    }

    /// Waits for the watch to end on its own.
    pub async fn wait(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(FleetError::Internal(format!("summary watch panicked: {e}"))),
        }
    }
}

impl<S: StoreSession> FleetManager<S> {
    /// Streams every model summary from `controller` onto the hub, keyed by
    /// model UUID.
    #[instrument(skip(self, cancel))]
    pub async fn watch_all_model_summaries(
        &self,
        controller: &EntityPath,
        cancel: CancellationToken,
    ) -> Result<SummaryWatch> {
        let conn = {
            let db = self.db()?;
            let doc = db.controller(controller).await?.doc;
            self.connect(&db, &doc).await?
        };

        let opened = conn.watch_all_model_summaries().await;
        let stream = self.checked(&conn, controller, opened).await?;

        let token = cancel.child_token();
        let task = tokio::spawn(pump(
            controller.clone(),
            conn,
            stream,
            self.hub.clone(),
            token.clone(),
        ));
        info!("Started model summary watch");

        Ok(SummaryWatch {
            controller: controller.clone(),
            cancel: token,
            task,
        })
    }

    /// Calls `handler` with live summaries of one model the actor may read.
    pub async fn subscribe_model_summaries<F>(
        &self,
        actor: &Identity,
        model: &EntityPath,
        handler: F,
    ) -> Result<Subscription>
    where
        F: Fn(&str, &ModelSummary) + Send + Sync + 'static,
    {
        let db = self.db()?;
        let model = self.readable_model(&db, actor, model).await?.doc;
        Ok(self.hub.subscribe(&model.uuid, handler))
    }
}

async fn pump(
    controller: EntityPath,
    conn: ControllerConn,
    mut stream: SummaryStream,
    hub: Hub<ModelSummary>,
    cancel: CancellationToken,
) -> Result<()> {
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%controller, "Model summary watch cancelled");
                return Ok(());
            }
            next = stream.next() => match next {
                Some(Ok(batch)) => {
                    for summary in batch {
                        let uuid = summary.uuid.clone();
                        hub.publish(&uuid, summary);
                    }
                }
                Some(Err(e)) => break e.to_string(),
                None => break "stream closed by controller".to_string(),
            }
        }
    };

    warn!(%controller, %reason, "Model summary watch terminated");
    // The connection is likely gone with the stream; the next caller redials.
    conn.evict().await;
    Err(FleetError::WatchTerminated { controller, reason })
}
