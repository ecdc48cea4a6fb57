use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use mesh_controller_core::{Id, Reference, Type};
use parking_lot::RwLock;

/// A many-to-many relation between items of one type and the links (of
/// another type) they depend on, indexed in both directions.
///
/// Both directions are updated under a single lock so that readers never
/// observe one half of a pair without the other.
#[derive(Debug)]
pub struct BiMapper {
    item_type: Type,
    link_type: Type,
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    items: HashMap<Reference, HashSet<Reference>>,
    links: HashMap<Reference, HashSet<Reference>>,
}

// === impl BiMapper ===

impl BiMapper {
    pub fn new(item_type: Type, link_type: Type) -> Self {
        Self {
            item_type,
            link_type,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn item_type(&self) -> Type {
        self.item_type
    }

    pub fn link_type(&self) -> Type {
        self.link_type
    }

    /// Replaces the full set of links for `item`.
    ///
    /// An item tracked with no links is still reported by [`Self::has_item`].
    pub fn track_item(&self, item: &Reference, links: impl IntoIterator<Item = Reference>) {
        self.check_item(item);
        let links = links
            .into_iter()
            .inspect(|link| self.check_link(link))
            .collect::<HashSet<_>>();

        let mut inner = self.inner.write();
        inner.remove_item(item);
        for link in &links {
            inner
                .links
                .entry(link.clone())
                .or_default()
                .insert(item.clone());
        }
        inner.items.insert(item.clone(), links);
    }

    pub fn untrack_item(&self, item: &Reference) {
        self.check_item(item);
        self.inner.write().remove_item(item);
    }

    /// Removes `link` from every item's link set.
    pub fn untrack_link(&self, link: &Reference) {
        self.check_link(link);
        let mut inner = self.inner.write();
        let items = match inner.links.remove(link) {
            Some(items) => items,
            None => return,
        };
        for item in items {
            if let Some(links) = inner.items.get_mut(&item) {
                links.remove(link);
            }
        }
    }

    pub fn item_ids_for_link(&self, link: &Reference) -> Vec<Id> {
        self.item_refs_for_link(link)
            .into_iter()
            .map(Id::from)
            .collect()
    }

    pub fn item_refs_for_link(&self, link: &Reference) -> Vec<Reference> {
        self.check_link(link);
        sorted(self.inner.read().links.get(link))
    }

    pub fn link_refs_for_item(&self, item: &Reference) -> Vec<Reference> {
        self.check_item(item);
        sorted(self.inner.read().items.get(item))
    }

    pub fn link_ids_for_item(&self, item: &Reference) -> Vec<Id> {
        self.link_refs_for_item(item)
            .into_iter()
            .map(Id::from)
            .collect()
    }

    pub fn has_item(&self, item: &Reference) -> bool {
        self.check_item(item);
        self.inner.read().items.contains_key(item)
    }

    /// Every link that at least one item references.
    pub fn links(&self) -> Vec<Reference> {
        let mut links = self.inner.read().links.keys().cloned().collect::<Vec<_>>();
        links.sort();
        links
    }

    pub fn items_len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn links_len(&self) -> usize {
        self.inner.read().links.len()
    }

    /// Returns true if every forward edge has a matching reverse edge and
    /// vice versa.
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.read();
        let forward = inner.items.iter().all(|(item, links)| {
            links
                .iter()
                .all(|l| inner.links.get(l).map_or(false, |items| items.contains(item)))
        });
        let reverse = inner.links.iter().all(|(link, items)| {
            !items.is_empty()
                && items
                    .iter()
                    .all(|i| inner.items.get(i).map_or(false, |links| links.contains(link)))
        });
        forward && reverse
    }

    fn check_item(&self, item: &Reference) {
        assert_eq!(
            item.ty, self.item_type,
            "expected item of type {}, got {item}",
            self.item_type
        );
    }

    fn check_link(&self, link: &Reference) {
        assert_eq!(
            link.ty, self.link_type,
            "expected link of type {}, got {link}",
            self.link_type
        );
    }
}

// === impl Inner ===

impl Inner {
    fn remove_item(&mut self, item: &Reference) {
        let links = match self.items.remove(item) {
            Some(links) => links,
            None => return,
        };
        for link in links {
            if let Some(items) = self.links.get_mut(&link) {
                items.remove(item);
                if items.is_empty() {
                    self.links.remove(&link);
                }
            }
        }
    }
}

fn sorted(refs: Option<&HashSet<Reference>>) -> Vec<Reference> {
    let mut refs = refs
        .map(|refs| refs.iter().cloned().collect::<Vec<_>>())
        .unwrap_or_default();
    refs.sort();
    refs
}
