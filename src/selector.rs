//! Target selector: always includes the local connector, and filters
//! configured servers by tag (or includes all of them when no tag is given).

use ops_model::Manifest;

use crate::connector::{local::LocalConnector, ssh::SshConnector, Connector};

pub fn select(manifest: &Manifest, tag: Option<&str>) -> Vec<Box<dyn Connector>> {
    let mut connectors: Vec<Box<dyn Connector>> = vec![Box::new(LocalConnector::new())];

    for (name, server) in &manifest.servers {
        let matches = match tag {
            None => true,
            Some(tag) => server.tags.iter().any(|t| t == tag),
        };
        if matches {
            connectors.push(Box::new(SshConnector::new(name.clone(), server.clone())));
        }
    }

    connectors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest::parse(
            r#"
servers:
  web1:
    host: 1.2.3.4
    user: deploy
    tags: [prod]
  web2:
    host: 5.6.7.8
    user: deploy
    tags: [staging]
tasks:
  noop:
    command: "true"
"#,
        )
        .unwrap()
    }

    #[test]
    fn no_tag_includes_every_server_plus_local() {
        let connectors = select(&manifest(), None);
        assert_eq!(connectors.len(), 3);
        assert!(connectors.iter().any(|c| c.local()));
    }

    #[test]
    fn tag_filters_servers_but_keeps_local() {
        let connectors = select(&manifest(), Some("prod"));
        assert_eq!(connectors.len(), 2);
        assert!(connectors.iter().any(|c| c.local()));
        assert!(connectors.iter().any(|c| c.host() == "1.2.3.4"));
    }
}
