use std::collections::HashMap;

use crate::config::LabelSettings;

/// Sorting category driven by the actuator's `category` encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Recyclable,
    Hazardous,
    Kitchen,
    Other,
}

impl Category {
    /// Wire id understood by the sorting firmware.
    pub fn id(self) -> u8 {
        match self {
            Category::Recyclable => 1,
            Category::Hazardous => 2,
            Category::Kitchen => 3,
            Category::Other => 4,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Category::Recyclable),
            2 => Some(Category::Hazardous),
            3 => Some(Category::Kitchen),
            4 => Some(Category::Other),
            _ => None,
        }
    }
}

/// Built-in class names of the bundled sorting model, indexed by class id.
const DEFAULT_NAMES: &[&str] = &[
    "bottle",
    "brick",
    "battery",
    "can",
    "carrot",
    "china",
    "paperCup",
    "pill",
    "potato",
    "radish",
    "stone",
    "potato_chip",
];

const DEFAULT_CATEGORIES: &[(&str, Category)] = &[
    ("bottle", Category::Recyclable),
    ("brick", Category::Other),
    ("battery", Category::Hazardous),
    ("can", Category::Recyclable),
    ("carrot", Category::Kitchen),
    ("china", Category::Other),
    ("paperCup", Category::Other),
    ("pill", Category::Hazardous),
    ("potato", Category::Kitchen),
    ("radish", Category::Kitchen),
    ("stone", Category::Other),
    ("potato_chip", Category::Other),
];

/// Class id to label names, and label to sorting category.
#[derive(Clone, Debug)]
pub struct LabelTable {
    names: Vec<String>,
    categories: HashMap<String, Category>,
}

impl Default for LabelTable {
    fn default() -> Self {
        Self {
            names: DEFAULT_NAMES.iter().map(|name| name.to_string()).collect(),
            categories: DEFAULT_CATEGORIES
                .iter()
                .map(|(label, category)| (label.to_string(), *category))
                .collect(),
        }
    }
}

impl LabelTable {
    /// Built-in table with configured names and category overrides applied.
    /// Category ids outside 1..=4 are ignored with a warning.
    pub fn from_settings(settings: &LabelSettings) -> Self {
        let mut table = Self::default();
        if !settings.names.is_empty() {
            table.names = settings.names.clone();
        }
        for (label, id) in &settings.categories {
            match Category::from_id(*id) {
                Some(category) => {
                    table.categories.insert(label.clone(), category);
                }
                None => log::warn!("ignoring unknown category id {} for label {}", id, label),
            }
        }
        table
    }

    /// Label for a class id; unknown ids render as `class_<id>`.
    pub fn label(&self, class_id: u32) -> String {
        self.names
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    /// Sorting category for a label; unmapped labels are `Other`.
    pub fn category(&self, label: &str) -> Category {
        self.categories
            .get(label)
            .copied()
            .unwrap_or(Category::Other)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
