//! Partial home-layout accumulation
//!
//! A home call may stream components through `env.send_partial_result`
//! before returning its final payload. The accumulator keys components by
//! title (untitled components get a synthetic per-call index) so later
//! emissions for the same titled component replace earlier ones in place.
//! It is per-call state: cleared on entry and exit.

use shiori_types::{HomeComponent, HomeLayout, HomePartialResult};

#[derive(Debug, Default)]
pub struct HomeAccumulator {
    order: Vec<String>,
    components: std::collections::HashMap<String, HomeComponent>,
    untitled: usize,
}

impl HomeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one partial emission in and return the layout so far.
    pub fn push(&mut self, partial: HomePartialResult) -> HomeLayout {
        match partial {
            HomePartialResult::Layout(layout) => {
                self.order.clear();
                self.components.clear();
                self.untitled = 0;
                for component in layout.components {
                    self.insert(component);
                }
            }
            HomePartialResult::Component(component) => self.insert(component),
        }
        self.snapshot()
    }

    fn insert(&mut self, component: HomeComponent) {
        let key = match &component.title {
            Some(title) => title.clone(),
            None => {
                self.untitled += 1;
                format!("#{}", self.untitled)
            }
        };
        if !self.components.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.components.insert(key, component);
    }

    /// The accumulated layout, in first-emission order.
    pub fn snapshot(&self) -> HomeLayout {
        HomeLayout {
            components: self
                .order
                .iter()
                .filter_map(|key| self.components.get(key).cloned())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.components.clear();
        self.untitled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiori_types::HomeComponentValue;

    fn component(title: Option<&str>, links: usize) -> HomeComponent {
        HomeComponent {
            title: title.map(str::to_string),
            subtitle: None,
            value: HomeComponentValue::Links(
                (0..links)
                    .map(|i| shiori_types::Link::new(format!("link {i}")))
                    .collect(),
            ),
        }
    }

    #[test]
    fn test_components_accumulate_in_order() {
        let mut accumulator = HomeAccumulator::new();
        accumulator.push(HomePartialResult::Component(component(Some("A"), 1)));
        let layout =
            accumulator.push(HomePartialResult::Component(component(Some("B"), 1)));
        assert_eq!(layout.components.len(), 2);
        assert_eq!(layout.components[0].title.as_deref(), Some("A"));
        assert_eq!(layout.components[1].title.as_deref(), Some("B"));
    }

    #[test]
    fn test_titled_component_replaces_in_place() {
        let mut accumulator = HomeAccumulator::new();
        accumulator.push(HomePartialResult::Component(component(Some("A"), 1)));
        accumulator.push(HomePartialResult::Component(component(Some("B"), 1)));
        let layout = accumulator.push(HomePartialResult::Component(component(Some("A"), 3)));
        assert_eq!(layout.components.len(), 2);
        // Still first, now with the replacement payload.
        assert_eq!(layout.components[0].title.as_deref(), Some("A"));
        let HomeComponentValue::Links(links) = &layout.components[0].value else {
            panic!("expected links");
        };
        assert_eq!(links.len(), 3);
    }

    #[test]
    fn test_untitled_components_are_distinct() {
        let mut accumulator = HomeAccumulator::new();
        accumulator.push(HomePartialResult::Component(component(None, 1)));
        let layout = accumulator.push(HomePartialResult::Component(component(None, 2)));
        assert_eq!(layout.components.len(), 2);
    }

    #[test]
    fn test_layout_snapshot_resets() {
        let mut accumulator = HomeAccumulator::new();
        accumulator.push(HomePartialResult::Component(component(Some("A"), 1)));
        let layout = accumulator.push(HomePartialResult::Layout(HomeLayout {
            components: vec![component(Some("C"), 1)],
        }));
        assert_eq!(layout.components.len(), 1);
        assert_eq!(layout.components[0].title.as_deref(), Some("C"));
    }
}
