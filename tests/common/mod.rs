//! Shared test actors and codec helpers.
#![allow(dead_code)] // each integration test uses a subset

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hypha::{Actor, ActorId, ActorSystem, ActorSystemError, Result};

/// Encode a value the way the test application marshals arguments.
pub fn encode<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("test value encodes")
}

/// Decode reply bytes, surfacing decode failures like a real caller.
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(ActorSystemError::decoding)
}

/// Test actor with a small method surface: arithmetic, greetings, a
/// deliberately failing target, a slow target, and node-info accessors.
pub struct Person {
    id: ActorId,
    name: String,
    system: Arc<ActorSystem>,
    neighbor: Mutex<Option<ActorId>>,
}

impl Person {
    pub fn new(id: ActorId, name: impl Into<String>, system: Arc<ActorSystem>) -> Self {
        Self {
            id,
            name: name.into(),
            system,
            neighbor: Mutex::new(None),
        }
    }

    pub fn add_one(&self, n: i64) -> i64 {
        n + 1
    }

    pub fn greet(&self, guest: &str) -> String {
        format!("Nice to meet you, {guest}.")
    }

    pub fn move_near(&self, other: &ActorId) {
        *self.neighbor.lock().unwrap() = Some(other.clone());
    }

    /// Resolve the neighbor through the system and ask for a greeting.
    pub fn introduce_yourself(&self) -> Result<String> {
        let neighbor_id = self
            .neighbor
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ActorSystemError::actor("nobody nearby"))?;
        let neighbor = self
            .system
            .resolve::<Person>(&neighbor_id)?
            .ok_or(ActorSystemError::ResolveFailed { id: neighbor_id })?;
        Ok(neighbor.greet(&self.name))
    }
}

#[async_trait]
impl Actor for Person {
    fn id(&self) -> &ActorId {
        &self.id
    }

    async fn receive_call(
        &self,
        target: &str,
        _generic_subs: &[String],
        args: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        match target {
            "addOne" => {
                let n: i64 = decode(first_arg(args)?)?;
                Ok(encode(&self.add_one(n)))
            }
            "greet" => {
                let guest: String = decode(first_arg(args)?)?;
                Ok(encode(&self.greet(&guest)))
            }
            "remember" => {
                let value: String = decode(first_arg(args)?)?;
                self.system.set_node_info("badge", Arc::new(value))?;
                Ok(Vec::new())
            }
            "recall" => {
                let value = self
                    .system
                    .node_info::<String>("badge")?
                    .map(|v| v.as_ref().clone());
                Ok(encode(&value))
            }
            "slow" => {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(encode(&"done"))
            }
            "boom" => Err(ActorSystemError::actor("intentional failure")),
            other => Err(ActorSystemError::actor(format!("unknown target {other}"))),
        }
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn first_arg(args: &[Vec<u8>]) -> Result<&Vec<u8>> {
    args.first()
        .ok_or_else(|| ActorSystemError::decoding("missing argument"))
}

/// Opt-in test logging: `RUST_LOG=hypha=debug cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Create and register a `Person` on the system.
pub fn spawn_person(
    system: &Arc<ActorSystem>,
    name: &str,
    hint: Option<ActorId>,
) -> Arc<Person> {
    let owner = system.clone();
    let name = name.to_string();
    system.make_local_actor(hint, move |id| Person::new(id, name, owner))
}
