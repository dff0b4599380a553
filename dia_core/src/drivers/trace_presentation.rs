//! Presentation that writes every new sample to the trace log.

use dia_common::consts::PRESENTATIONS_KEY;
use dia_common::error::CoreResult;
use dia_common::settings::{SettingDefinition, SettingType, SettingsBinding, SettingsReport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::info;

use crate::channels::{ChannelDatabase, ChannelEvent, SubscriptionId};
use crate::core_services::CoreServices;
use crate::service::Service;
use crate::settings::SettingsBase;
use dia_common::channel::ChannelEventKind;

/// Driver reference.
pub const DRIVER: &str = "dia_core.presentations.trace:TracePresentation";

#[derive(Default)]
struct Subscriptions {
    keyed: Vec<(String, SubscriptionId)>,
    wildcard: Option<SubscriptionId>,
}

/// Shared between the presentation and its subscriber callbacks.
struct Tracer {
    name: String,
    filter: Mutex<Option<Vec<String>>>,
    subscriptions: Mutex<Subscriptions>,
    seen: AtomicU64,
}

impl Tracer {
    fn wants(&self, channel: &str) -> bool {
        self.filter
            .lock()
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == channel))
    }

    fn follow(self: &Arc<Self>, database: &ChannelDatabase, channel: &str) {
        if !self.wants(channel) {
            return;
        }
        let tracer = Arc::downgrade(self);
        let id = database.publisher().subscribe(channel, move |event| {
            if let Some(tracer) = tracer.upgrade() {
                tracer.on_sample(event);
            }
            Ok(())
        });
        self.subscriptions.lock().keyed.push((channel.to_string(), id));
    }

    /// Drop bookkeeping for a removed channel; its subscribers are already gone.
    fn forget(&self, channel: &str) {
        self.subscriptions.lock().keyed.retain(|(name, _)| name != channel);
    }

    fn on_sample(&self, event: &ChannelEvent) {
        self.seen.fetch_add(1, Ordering::Relaxed);
        let sample = &event.channel.sample;
        info!(
            presentation = %self.name,
            channel = %event.channel.name,
            timestamp = sample.timestamp,
            unit = %sample.unit,
            "{}",
            sample.value
        );
    }
}

/// Logs samples of every channel, or of the channels listed in the
/// `channels` setting.
pub struct TracePresentation {
    core: Arc<CoreServices>,
    settings: SettingsBase,
    tracer: Arc<Tracer>,
}

/// Factory registered in the driver catalog.
pub fn create(name: &str, core: &Arc<CoreServices>) -> CoreResult<Arc<dyn Service>> {
    let settings = SettingsBase::new(
        core.settings()?,
        SettingsBinding::instance(PRESENTATIONS_KEY, name),
        vec![SettingDefinition::new("channels", SettingType::List)],
    );
    Ok(Arc::new(TracePresentation {
        core: Arc::clone(core),
        settings,
        tracer: Arc::new(Tracer {
            name: name.to_string(),
            filter: Mutex::new(None),
            subscriptions: Mutex::new(Subscriptions::default()),
            seen: AtomicU64::new(0),
        }),
    }))
}

impl TracePresentation {
    /// Samples traced since construction.
    pub fn samples_seen(&self) -> u64 {
        self.tracer.seen.load(Ordering::Relaxed)
    }

    /// Channels currently traced.
    pub fn followed_channels(&self) -> Vec<String> {
        self.tracer
            .subscriptions
            .lock()
            .keyed
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Service for TracePresentation {
    fn instance_name(&self) -> &str {
        &self.tracer.name
    }

    fn apply_settings(&self) -> CoreResult<SettingsReport> {
        let report = self.settings.apply_settings()?;
        *self.tracer.filter.lock() = self.settings.get_setting_as::<Vec<String>>("channels").ok();
        Ok(report)
    }

    fn start(&self) -> CoreResult<()> {
        let database = self.core.channel_database()?;
        for channel in database.channel_list() {
            self.tracer.follow(&database, &channel);
        }

        let tracer = Arc::downgrade(&self.tracer);
        let weak_db: Weak<ChannelDatabase> = Arc::downgrade(&database);
        let id = database.publisher().subscribe_new_channels(move |event| {
            let Some(tracer) = tracer.upgrade() else {
                return Ok(());
            };
            match event.kind {
                ChannelEventKind::ChannelAdded => {
                    if let Some(database) = weak_db.upgrade() {
                        tracer.follow(&database, &event.channel.name);
                    }
                }
                ChannelEventKind::ChannelRemoved => tracer.forget(&event.channel.name),
                ChannelEventKind::NewSample => {}
            }
            Ok(())
        });
        self.tracer.subscriptions.lock().wildcard = Some(id);
        info!("{}: tracing {} channels", self.tracer.name, self.tracer.subscriptions.lock().keyed.len());
        Ok(())
    }

    fn stop(&self) -> CoreResult<()> {
        let subscriptions = std::mem::take(&mut *self.tracer.subscriptions.lock());
        let Ok(database) = self.core.channel_database() else {
            return Ok(());
        };
        for (channel, id) in subscriptions.keyed {
            database.publisher().unsubscribe(&channel, id);
        }
        if let Some(id) = subscriptions.wildcard {
            database.publisher().unsubscribe_new_channels(id);
        }
        Ok(())
    }
}
