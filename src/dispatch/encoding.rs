use anyhow::{anyhow, Result};
use std::str::FromStr;

use crate::detect::LabelTable;
use crate::event::ClassificationEvent;

/// Wire format written to the actuator for each event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActuatorEncoding {
    /// `"<class_id>"`
    #[default]
    ClassId,
    /// `"<category_id>"`, the sorting bin from the label table.
    Category,
    /// `"<class_id>,<score>,<label>\n"`, score with two decimals.
    Triple,
}

impl FromStr for ActuatorEncoding {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "class" | "class_id" => Ok(ActuatorEncoding::ClassId),
            "category" => Ok(ActuatorEncoding::Category),
            "triple" => Ok(ActuatorEncoding::Triple),
            other => Err(anyhow!(
                "unknown actuator encoding '{}': expected class, category or triple",
                other
            )),
        }
    }
}

impl ActuatorEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            ActuatorEncoding::ClassId => "class",
            ActuatorEncoding::Category => "category",
            ActuatorEncoding::Triple => "triple",
        }
    }

    pub fn encode(self, event: &ClassificationEvent, labels: &LabelTable) -> Vec<u8> {
        let message = match self {
            ActuatorEncoding::ClassId => event.class_id.to_string(),
            ActuatorEncoding::Category => labels.category(&event.label).id().to_string(),
            ActuatorEncoding::Triple => {
                // Commas inside a label would break the firmware's field split.
                let label = event.label.replace(',', "_");
                format!("{},{:.2},{}\n", event.class_id, event.score, label)
            }
        };
        message.into_bytes()
    }
}
