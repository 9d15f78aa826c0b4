//
// service_index.rs
//
// Workspace-wide service name lookup
//
// Maps each service name to the set of bundle ids whose manifests mention
// it, and resolves service names back to the concrete provides/providing
// fragments of the documents that declare them.
//

use std::collections::HashSet;

use crate::manifest::{ManifestDocument, StringFragment};
use crate::multi_value_index::MultiValueIndex;

/// Source of parsed manifests, keyed by bundle id. Lets the index resolve
/// names to fragments without owning the document corpus itself.
pub trait ManifestProvider {
    fn provide_manifest(&self, bundle_id: &str) -> Option<&ManifestDocument>;
}

/// Reverse index from service names to the bundles touching them.
#[derive(Debug, Default)]
pub struct ServiceNameIndex {
    servicename_to_bundle_ids: MultiValueIndex<String, String>,
}

impl ServiceNameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every service name of the given bundle's manifest. A bundle
    /// id unknown to the provider contributes nothing.
    pub fn index_manifest(&mut self, bundle_id: &str, provider: &dyn ManifestProvider) {
        let Some(doc) = provider.provide_manifest(bundle_id) else {
            return;
        };
        for service_name in doc.service_names() {
            self.servicename_to_bundle_ids
                .index(service_name.clone(), bundle_id.to_string());
        }
    }

    /// Remove all associations of one bundle, dropping service names no
    /// other bundle still mentions.
    pub fn clear_for_manifest(&mut self, bundle_id: &str) {
        self.servicename_to_bundle_ids.invalidate_value(bundle_id);
    }

    pub fn clear_all(&mut self) {
        self.servicename_to_bundle_ids.clear();
    }

    /// Ids of all bundles providing or consuming the service name.
    pub fn find_bundle_ids_by_service_name(&self, service_name: &str) -> HashSet<String> {
        self.servicename_to_bundle_ids.get_values(service_name)
    }

    pub fn service_names(&self) -> Vec<&String> {
        self.servicename_to_bundle_ids.keys().collect()
    }

    /// All `provides` fragments declaring the service name, across every
    /// indexed bundle. Bundles whose document the provider no longer has
    /// are skipped silently.
    pub fn find_provides_for(
        &self,
        service_name: &str,
        provider: &dyn ManifestProvider,
    ) -> Vec<StringFragment> {
        self.collect_fragments(service_name, provider, |doc| {
            doc.provides_for(service_name)
        })
    }

    /// All `providing` fragments consuming the service name.
    pub fn find_providing_for(
        &self,
        service_name: &str,
        provider: &dyn ManifestProvider,
    ) -> Vec<StringFragment> {
        self.collect_fragments(service_name, provider, |doc| {
            doc.providing_for(service_name)
        })
    }

    fn collect_fragments(
        &self,
        service_name: &str,
        provider: &dyn ManifestProvider,
        select: impl Fn(&ManifestDocument) -> HashSet<StringFragment>,
    ) -> Vec<StringFragment> {
        let mut fragments = Vec::new();
        for bundle_id in self.find_bundle_ids_by_service_name(service_name) {
            if let Some(doc) = provider.provide_manifest(&bundle_id) {
                fragments.extend(select(doc));
            }
        }
        fragments
    }
}
