//! Per-connection RESP state

/// State of one RESP client connection
#[derive(Debug, Clone)]
pub struct Session {
  id: u64,
  selected: String,
  client_name: Option<String>,
}

impl Session {
  pub fn new(id: u64, default_cache: &str) -> Self {
    Self {
      id,
      selected: default_cache.to_string(),
      client_name: None,
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  /// Name of the cache commands run against
  pub fn selected(&self) -> &str {
    &self.selected
  }

  pub fn select(&mut self, cache: impl Into<String>) {
    self.selected = cache.into();
  }

  pub fn client_name(&self) -> Option<&str> {
    self.client_name.as_deref()
  }

  pub fn set_client_name(&mut self, name: Option<String>) {
    self.client_name = name.filter(|n| !n.is_empty());
  }

  /// Ownership tag used while `command` holds the selected cache
  pub fn tag(&self, command: &str) -> String {
    format!("resp-{}-{}", self.id, command)
  }
}
