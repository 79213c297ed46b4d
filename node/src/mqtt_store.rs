use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use hab_node_common::{Item, ItemStore, MqttConfig, StoreError};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const MAX_STATE_BYTES: usize = 256;

#[derive(Debug)]
struct StateCache {
    prefix: String,
    states: Mutex<HashMap<String, String>>,
    updates: broadcast::Sender<Item>,
}

impl StateCache {
    fn new(prefix: &str) -> Self {
        let (updates, _) = broadcast::channel(32);
        Self {
            prefix: prefix.to_string(),
            states: Mutex::new(HashMap::new()),
            updates,
        }
    }

    fn state_topic(&self, name: &str) -> String {
        format!("{}/{name}/state", self.prefix)
    }

    fn wildcard(&self) -> String {
        format!("{}/+/state", self.prefix)
    }

    fn item_name<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?
            .strip_suffix("/state")
            .filter(|name| !name.is_empty() && !name.contains('/'))
    }

    fn get(&self, name: &str) -> Option<String> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn store(&self, name: &str, state: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), state.to_string());
        let _ = self.updates.send(Item {
            name: name.to_string(),
            state: state.to_string(),
        });
    }

    fn record(&self, topic: &str, payload: &[u8]) -> Option<Item> {
        let name = self.item_name(topic)?;
        if payload.len() > MAX_STATE_BYTES {
            warn!(
                "dropping oversized state on {topic} ({} bytes)",
                payload.len()
            );
            return None;
        }
        let state = match std::str::from_utf8(payload) {
            Ok(state) => state.trim(),
            Err(_) => {
                warn!("dropping non utf8 state on {topic}");
                return None;
            }
        };

        self.store(name, state);
        Some(Item {
            name: name.to_string(),
            state: state.to_string(),
        })
    }
}

pub struct MqttItemStore {
    client: AsyncClient,
    cache: Arc<StateCache>,
}

impl MqttItemStore {
    pub fn connect(config: &MqttConfig) -> Arc<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if !config.user.is_empty() {
            options.set_credentials(&config.user, &config.pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let cache = Arc::new(StateCache::new(&config.topic_prefix));
        spawn_mqtt_loop(client.clone(), cache.clone(), eventloop);

        info!(
            "item store on mqtt://{}:{} under `{}`",
            config.host, config.port, config.topic_prefix
        );
        Arc::new(Self { client, cache })
    }
}

fn spawn_mqtt_loop(client: AsyncClient, cache: Arc<StateCache>, mut eventloop: EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Some(item) = cache.record(&message.topic, &message.payload) {
                        debug!("item {} = {}", item.name, item.state);
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    if let Err(err) = client.try_subscribe(cache.wildcard(), QoS::AtLeastOnce) {
                        warn!("failed to subscribe to item states: {err}");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

#[async_trait]
impl ItemStore for MqttItemStore {
    // Waits for the retained state if none has arrived yet.
    async fn get_item(&self, name: &str) -> Result<Item, StoreError> {
        let mut updates = self.cache.updates.subscribe();
        loop {
            if let Some(state) = self.cache.get(name) {
                return Ok(Item {
                    name: name.to_string(),
                    state,
                });
            }

            match updates.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(StoreError::Unavailable("mqtt loop stopped".to_string()));
                }
            }
        }
    }

    fn submit_item(&self, name: &str, state: &str) {
        let topic = self.cache.state_topic(name);
        match self
            .client
            .try_publish(&topic, QoS::AtLeastOnce, true, state.as_bytes().to_vec())
        {
            Ok(()) => self.cache.store(name, state),
            Err(err) => warn!("failed to publish {topic}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn topics_map_to_item_names() {
        let cache = StateCache::new("openhab");

        assert_eq!(cache.state_topic("Maison_mode"), "openhab/Maison_mode/state");
        assert_eq!(cache.wildcard(), "openhab/+/state");
        assert_eq!(cache.item_name("openhab/Maison_mode/state"), Some("Maison_mode"));
        assert_eq!(cache.item_name("openhab/Maison_mode/command"), None);
        assert_eq!(cache.item_name("openhab2/Maison_mode/state"), None);
        assert_eq!(cache.item_name("openhab//state"), None);
    }

    #[test]
    fn retained_states_are_cached_trimmed() {
        let cache = StateCache::new("openhab");

        let item = cache.record("openhab/Salon_Temperature2/state", b" 21.5\n");

        assert_eq!(
            item,
            Some(Item {
                name: "Salon_Temperature2".to_string(),
                state: "21.5".to_string(),
            })
        );
        assert_eq!(cache.get("Salon_Temperature2").as_deref(), Some("21.5"));
        assert_eq!(cache.record("openhab/other/state", &[0xFF, 0xFE]), None);
    }

    #[tokio::test]
    async fn late_state_wakes_waiting_reader() {
        let cache = Arc::new(StateCache::new("openhab"));
        let mut updates = cache.updates.subscribe();

        let writer = cache.clone();
        tokio::spawn(async move {
            writer.record("openhab/Maison_mode/state", b"0");
        });

        let item = updates.recv().await.unwrap();
        assert_eq!(item.state, "0");
        assert_eq!(cache.get("Maison_mode").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn submitted_state_is_queued_without_waiting_for_the_broker() {
        let options = MqttOptions::new("hab-node-test", "broker.invalid", 1883);
        let (client, _eventloop) = AsyncClient::new(options, 1);
        let store = MqttItemStore {
            client,
            cache: Arc::new(StateCache::new("openhab")),
        };

        store.submit_item("Salon_Temperature2", "21.5");
        // The request queue is full and nothing drains it.
        store.submit_item("Salon_Humidite2", "48.0");

        let item = store.get_item("Salon_Temperature2").await.unwrap();
        assert_eq!(item.state, "21.5");
        assert_eq!(store.cache.get("Salon_Humidite2"), None);
    }
}
