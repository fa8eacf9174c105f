//! Copying catalog metadata onto tree nodes.

use std::collections::HashMap;

use tracing::info;

use super::types::{CatalogModel, CatalogResource, DEFAULT_GROUP};
use crate::model::Tree;

/// Pick the resource whose format ranks highest in `priority`.
///
/// Falls back to the first resource when no format is listed.
pub fn choose_priority_resource<'a>(
    resources: &'a [CatalogResource],
    priority: &[String],
) -> Option<&'a CatalogResource> {
    let rank = |r: &CatalogResource| {
        priority
            .iter()
            .position(|f| *f == r.format)
            .unwrap_or(priority.len())
    };
    let first = resources.first()?;
    Some(
        resources
            .iter()
            .filter(|r| rank(*r) < priority.len())
            .min_by_key(|r| rank(*r))
            .unwrap_or(first),
    )
}

struct Entry<'a> {
    title: &'a str,
    resource: Option<&'a CatalogResource>,
}

/// Update titles, URLs and formats of nodes whose names match catalog groups
/// or datasets. Returns the number of nodes updated.
pub fn apply_catalog(tree: &mut Tree, model: &CatalogModel, priority: &[String]) -> usize {
    let mut lookup: HashMap<&str, Entry<'_>> = HashMap::new();

    for (group_name, group) in model {
        if group_name != DEFAULT_GROUP {
            lookup.insert(
                group_name.as_str(),
                Entry {
                    title: group.title.trim(),
                    resource: None,
                },
            );
        }
        for dataset in &group.datasets {
            if dataset.package_name.is_empty() {
                continue;
            }
            lookup.insert(
                dataset.package_name.as_str(),
                Entry {
                    title: dataset.title.trim(),
                    resource: choose_priority_resource(&dataset.resources, priority),
                },
            );
        }
    }

    let urns: Vec<_> = tree.nodes().map(|n| n.urn).collect();
    let mut matches = 0;
    for urn in urns {
        let Some(node) = tree.get_mut(urn) else {
            continue;
        };
        let Some(entry) = lookup.get(node.name.as_str()) else {
            continue;
        };
        node.title = Some(entry.title.to_string());
        if let Some(resource) = entry.resource {
            node.url = Some(resource.url.trim().to_string());
            node.format = Some(resource.format.trim().to_string());
        }
        matches += 1;
    }

    info!("Metadata sync complete, updated {} node(s)", matches);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogDataset, CatalogGroup};
    use crate::model::{NodeAttrs, NodeType};

    fn resource(url: &str, format: &str) -> CatalogResource {
        CatalogResource {
            url: url.to_string(),
            format: format.to_string(),
        }
    }

    fn priority() -> Vec<String> {
        vec!["GPKG".to_string(), "GeoJSON".to_string()]
    }

    #[test]
    fn test_choose_priority_resource() {
        let resources = vec![
            resource("a.kml", "KML"),
            resource("a.geojson", "GeoJSON"),
            resource("a.gpkg", "GPKG"),
        ];
        assert_eq!(
            choose_priority_resource(&resources, &priority()).unwrap().format,
            "GPKG"
        );

        let unlisted = vec![resource("a.kml", "KML"), resource("a.csv", "CSV")];
        assert_eq!(
            choose_priority_resource(&unlisted, &priority()).unwrap().url,
            "a.kml"
        );
        assert!(choose_priority_resource(&[], &priority()).is_none());
    }

    #[test]
    fn test_apply_catalog_updates_matching_nodes() {
        let mut tree = Tree::new();
        let root = tree.root();
        let group = tree.add_child(root, "landscape", NodeAttrs::default()).unwrap();
        let parks = tree
            .add_child(group, "national-parks", NodeAttrs::default().with_type(NodeType::Source))
            .unwrap();
        let other = tree.add_child(group, "unknown", NodeAttrs::default()).unwrap();

        let mut model = CatalogModel::new();
        model.insert(
            "landscape".to_string(),
            CatalogGroup {
                title: "Landscape ".to_string(),
                datasets: vec![CatalogDataset {
                    package_name: "national-parks".to_string(),
                    title: "National Parks".to_string(),
                    resources: vec![
                        resource("https://example.org/parks.geojson", "GeoJSON"),
                        resource("https://example.org/parks.gpkg", "GPKG"),
                    ],
                }],
            },
        );

        assert_eq!(apply_catalog(&mut tree, &model, &priority()), 2);
        assert_eq!(tree.get(group).unwrap().title.as_deref(), Some("Landscape"));
        let parks = tree.get(parks).unwrap();
        assert_eq!(parks.url.as_deref(), Some("https://example.org/parks.gpkg"));
        assert_eq!(parks.format.as_deref(), Some("GPKG"));
        assert!(tree.get(other).unwrap().title.is_none());
    }
}
