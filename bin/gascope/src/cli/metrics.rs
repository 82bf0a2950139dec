// This file is part of Gascope.
//
// Gascope is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Gascope is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Gascope.
// If not, see https://www.gnu.org/licenses/.

use std::net::SocketAddr;

use itertools::Itertools;
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_util::layers::{PrefixLayer, Stack};

const METRICS_PREFIX: &str = "gascope";

/// Install the prometheus recorder and serve it on `listen_addr`
pub fn initialize<'a>(
    listen_addr: SocketAddr,
    tags: impl IntoIterator<Item = &'a String>,
    buckets: &[f64],
) -> anyhow::Result<()> {
    let mut builder = PrometheusBuilder::new().with_http_listener(listen_addr);

    for (k, v) in parse_tags(tags) {
        builder = builder.add_global_label(k, v);
    }
    builder = builder.set_buckets(buckets)?;

    let (recorder, exporter) = builder.build()?;
    tokio::spawn(async move {
        if exporter.await.is_err() {
            tracing::error!("metrics exporter failed");
        }
    });
    Stack::new(recorder)
        .push(PrefixLayer::new(METRICS_PREFIX))
        .install()?;

    Ok(())
}

/// `key=value` pairs, malformed tags are skipped
fn parse_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> Vec<(&'a str, &'a str)> {
    tags.into_iter()
        .filter_map(|t| t.split('=').collect_tuple())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        let tags = vec![
            "env=prod".to_string(),
            "malformed".to_string(),
            "region=us-east-1".to_string(),
            "a=b=c".to_string(),
        ];
        assert_eq!(
            parse_tags(&tags),
            vec![("env", "prod"), ("region", "us-east-1")]
        );
    }
}
