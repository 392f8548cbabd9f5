//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Startup and shutdown of the broker side of the service.
//
// | Step | Description                                                                  |
// |------|------------------------------------------------------------------------------|
// | 1    | Open the first channel under the channel retry policy                        |
// | 2    | Declare the topology on it; any failure aborts startup                       |
// | 3    | Spawn one dispatcher per main queue, all reading the supervisor's handle     |
// | 4    | Spawn the supervisor, which reopens the channel whenever it closes           |
// | 5    | On shutdown, close the channel only after every dispatcher has settled       |
//--------------------------------------------------------------------------------------------------

use std::sync::Arc;

use rabbitmq::{
    BrokerChannel, ChannelHandle, ChannelOpener, ChannelSupervisor, RabbitMQError, RetryPolicy,
    declare,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    domain::SubscriptionHub,
    inbounds::{DispatchStats, QueueDispatcher},
    outbounds::EventRouter,
};

/// Running consumer side plus the publish path bound to the same channel.
pub struct Bridge<C: BrokerChannel> {
    router: Arc<EventRouter<C>>,
    handle: ChannelHandle<C>,
    supervisor: JoinHandle<Result<u64, RabbitMQError>>,
    dispatchers: Vec<(String, JoinHandle<Result<DispatchStats, RabbitMQError>>)>,
    cancel: CancellationToken,
}

impl<C: BrokerChannel> Bridge<C> {
    pub async fn start<O>(
        opener: O,
        policy: RetryPolicy,
        config: &Config,
        hub: Arc<SubscriptionHub>,
        cancel: CancellationToken,
    ) -> Result<Self, RabbitMQError>
    where
        O: ChannelOpener<Channel = C>,
    {
        let supervisor = ChannelSupervisor::start(opener, policy).await?;
        declare(&supervisor.current(), &config.topology).await?;

        let handle = supervisor.handle();
        let dispatchers = config
            .topology
            .queues()
            .map(|queue| {
                let dispatcher = QueueDispatcher::new(
                    queue,
                    config.prefetch,
                    config.zero_delivery,
                    handle.clone(),
                    hub.clone(),
                );
                (queue.to_owned(), tokio::spawn(dispatcher.run(cancel.clone())))
            })
            .collect::<Vec<_>>();

        let router = Arc::new(EventRouter::new(
            handle.clone(),
            &config.topology.exchange,
            config.routes.clone(),
        ));
        let supervisor = tokio::spawn(supervisor.run(cancel.clone()));

        info!("bridge started with {} dispatcher(s)", dispatchers.len());
        Ok(Self {
            router,
            handle,
            supervisor,
            dispatchers,
            cancel,
        })
    }

    pub fn router(&self) -> Arc<EventRouter<C>> {
        Arc::clone(&self.router)
    }

    /// Waits for every task to stop. A fatal supervisor error cancels the rest
    /// of the service and is returned once the dispatchers have drained.
    ///
    /// The channel is closed last, so a delivery already handed to the hub is
    /// still acked or rejected on it.
    pub async fn wait(self) -> Result<DispatchStats, RabbitMQError> {
        let supervised = match self.supervisor.await {
            Ok(result) => result,
            Err(err) => {
                error!("channel supervisor task failed: {}", err);
                Err(RabbitMQError::SupervisorGone)
            }
        };
        if supervised.is_err() {
            self.cancel.cancel();
        }

        let mut totals = DispatchStats::default();
        for (queue, dispatcher) in self.dispatchers {
            match dispatcher.await {
                Ok(Ok(stats)) => {
                    totals.acked += stats.acked;
                    totals.dead_lettered += stats.dead_lettered;
                    totals.resubscriptions += stats.resubscriptions;
                }
                Ok(Err(err)) => warn!("dispatcher for {} stopped with error: {}", queue, err),
                Err(err) => error!("dispatcher task for {} failed: {}", queue, err),
            }
        }

        let channel = self.handle.current();
        if channel.is_open() {
            if let Err(err) = channel.close().await {
                warn!("closing channel on shutdown: {}", err);
            }
        }

        let reopens = supervised?;
        info!("bridge stopped after {} channel reopen(s): {}", reopens, totals);
        Ok(totals)
    }
}
