// broker/testing.rs
//! In-memory broker double with scripted failures.
use super::{BrokerError, Channel, Connector};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex},
};

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    ConnectionLost,
    Rejected,
}

#[derive(Debug, Default)]
struct Script {
    refused_connects: usize,
    stalled: bool,
    faults: VecDeque<Fault>,
    connects: usize,
    attempts: usize,
    declared: Vec<String>,
    published: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    script: Arc<Mutex<Script>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connects(&self, count: usize) {
        self.script.lock().unwrap().refused_connects = count;
    }

    /// Every following connect hangs forever.
    pub fn stall_connects(&self) {
        self.script.lock().unwrap().stalled = true;
    }

    pub fn fail_next_publish(&self, fault: Fault) {
        self.script.lock().unwrap().faults.push_back(fault);
    }

    pub fn connects(&self) -> usize {
        self.script.lock().unwrap().connects
    }

    pub fn publish_attempts(&self) -> usize {
        self.script.lock().unwrap().attempts
    }

    pub fn declared(&self) -> Vec<String> {
        self.script.lock().unwrap().declared.clone()
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.script.lock().unwrap().published.clone()
    }
}

fn connection_lost() -> BrokerError {
    BrokerError::ConnectionLost(Box::new(io::Error::from(io::ErrorKind::ConnectionReset)))
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Channel>, BrokerError> {
        let stalled = {
            let mut script = self.script.lock().unwrap();
            script.connects += 1;
            if script.refused_connects > 0 {
                script.refused_connects -= 1;
                return Err(connection_lost());
            }
            script.stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl Channel for MemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.script.lock().unwrap().declared.push(queue.to_string());
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut script = self.script.lock().unwrap();
        script.attempts += 1;
        match script.faults.pop_front() {
            Some(Fault::ConnectionLost) => Err(connection_lost()),
            Some(Fault::Rejected) => Err(BrokerError::Rejected("queue not found".into())),
            None => {
                let body: Value = serde_json::from_slice(payload)?;
                script.published.push((queue.to_string(), body));
                Ok(())
            }
        }
    }
}
