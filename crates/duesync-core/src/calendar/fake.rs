//! Scripted in-memory provider for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::calendar::provider::CalendarProvider;
use crate::error::ProviderError;

/// In-memory provider recording calls and replaying scripted failures.
#[derive(Default)]
pub(crate) struct FakeProvider {
    calls: Mutex<Vec<String>>,
    events: Mutex<HashMap<String, Value>>,
    script: Mutex<VecDeque<ProviderError>>,
    next_id: AtomicU64,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure consumed by the next provider call.
    pub fn push_failure(&self, err: ProviderError) {
        self.script.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn event(&self, event_id: &str) -> Option<Value> {
        self.events.lock().unwrap().get(event_id).cloned()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn record(&self, call: String) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(call);
        match self.script.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CalendarProvider for FakeProvider {
    async fn insert_calendar(&self, _token: &str, summary: &str) -> Result<String, ProviderError> {
        self.record(format!("insert_calendar {summary}"))?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("cal-{n}"))
    }

    async fn insert_event(
        &self,
        _token: &str,
        calendar_id: &str,
        body: &Value,
    ) -> Result<String, ProviderError> {
        self.record(format!("insert_event {calendar_id}"))?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event_id = format!("ev-{n}");
        self.events
            .lock()
            .unwrap()
            .insert(event_id.clone(), body.clone());
        Ok(event_id)
    }

    async fn patch_event(
        &self,
        _token: &str,
        calendar_id: &str,
        event_id: &str,
        body: &Value,
    ) -> Result<(), ProviderError> {
        self.record(format!("patch_event {calendar_id}/{event_id}"))?;
        let mut events = self.events.lock().unwrap();
        match events.get_mut(event_id) {
            Some(existing) => {
                if let (Some(existing), Some(patch)) = (existing.as_object_mut(), body.as_object())
                {
                    for (k, v) in patch {
                        existing.insert(k.clone(), v.clone());
                    }
                }
                Ok(())
            }
            None => Err(ProviderError::NotFound(format!("event {event_id}"))),
        }
    }

    async fn delete_event(
        &self,
        _token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), ProviderError> {
        self.record(format!("delete_event {calendar_id}/{event_id}"))?;
        match self.events.lock().unwrap().remove(event_id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(format!("event {event_id}"))),
        }
    }
}
