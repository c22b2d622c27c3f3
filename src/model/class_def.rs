//! Class definitions and the class table.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A named, colored category that annotations are tagged with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    /// Stable identifier, never reused after deletion within a session.
    pub id: u32,
    /// Display name, unique among live classes.
    pub name: String,
    /// RGB color for rendering.
    pub color: [u8; 3],
}

impl ClassDef {
    pub fn new(id: u32, name: impl Into<String>, color: [u8; 3]) -> Self {
        Self {
            id,
            name: name.into(),
            color,
        }
    }
}

/// Distinct default colors, assigned to new classes in order.
const DEFAULT_COLORS: [[u8; 3]; 20] = [
    [0xFF, 0x00, 0x00], // Red
    [0x00, 0xFF, 0x00], // Green
    [0x00, 0x00, 0xFF], // Blue
    [0xFF, 0xFF, 0x00], // Yellow
    [0xFF, 0x00, 0xFF], // Magenta
    [0x00, 0xFF, 0xFF], // Cyan
    [0xFF, 0x8C, 0x00], // Orange
    [0x8B, 0x00, 0xFF], // Violet
    [0x00, 0xCE, 0xD1], // Turquoise
    [0xFF, 0x14, 0x93], // Pink
    [0x32, 0xCD, 0x32], // Lime green
    [0xFF, 0xD7, 0x00], // Gold
    [0xDC, 0x14, 0x3C], // Crimson
    [0x41, 0x69, 0xE1], // Royal blue
    [0x22, 0x8B, 0x22], // Forest green
    [0xFF, 0x63, 0x47], // Tomato
    [0x94, 0x00, 0xD3], // Dark violet
    [0x20, 0xB2, 0xAA], // Light sea green
    [0xF0, 0x80, 0x80], // Light coral
    [0x6B, 0x8E, 0x23], // Olive
];

/// Convert HSV to RGB (h in degrees, s and v in 0-1).
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    [
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    ]
}

/// The live set of classes for a session.
///
/// Ids are monotonic and never reused; names are unique among live
/// classes. New classes draw colors from the palette, then fall back to
/// golden-angle hues so colors stay distinct and deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassTable {
    classes: Vec<ClassDef>,
    next_id: u32,
    color_index: usize,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new class with an automatically assigned id and color.
    pub fn add(&mut self, name: impl Into<String>) -> Result<&ClassDef, EngineError> {
        let name = name.into();
        // Check before drawing a color so failed adds don't burn a hue
        self.check_name(&name, None)?;
        let color = self.next_color();
        self.add_with_color(name, color)
    }

    /// Add a new class with an explicit color.
    pub fn add_with_color(
        &mut self,
        name: impl Into<String>,
        color: [u8; 3],
    ) -> Result<&ClassDef, EngineError> {
        let name = name.into();
        self.check_name(&name, None)?;

        let id = self.next_id;
        self.next_id += 1;
        self.classes.push(ClassDef::new(id, name, color));
        Ok(self.classes.last().expect("just pushed"))
    }

    /// Add a class with a specific id, used when rehydrating a saved
    /// session. Returns the existing class if the id is already live.
    pub fn add_with_id(
        &mut self,
        id: u32,
        name: impl Into<String>,
        color: Option<[u8; 3]>,
    ) -> Result<&ClassDef, EngineError> {
        if let Some(index) = self.classes.iter().position(|c| c.id == id) {
            return Ok(&self.classes[index]);
        }
        let name = name.into();
        self.check_name(&name, None)?;

        let color = color.unwrap_or_else(|| self.next_color());
        self.classes.push(ClassDef::new(id, name, color));
        // Keep the id counter ahead of every live id
        if id >= self.next_id {
            self.next_id = id + 1;
        }
        Ok(self.classes.last().expect("just pushed"))
    }

    /// Remove a class by id.
    ///
    /// The caller (session) is responsible for checking that no
    /// annotation references the class first.
    pub fn remove(&mut self, id: u32) -> Result<ClassDef, EngineError> {
        let index = self
            .classes
            .iter()
            .position(|c| c.id == id)
            .ok_or(EngineError::ClassNotFound { id })?;
        Ok(self.classes.remove(index))
    }

    /// Rename and/or recolor a class.
    pub fn update(
        &mut self,
        id: u32,
        name: Option<&str>,
        color: Option<[u8; 3]>,
    ) -> Result<(), EngineError> {
        if let Some(name) = name {
            self.check_name(name, Some(id))?;
        }
        let class = self
            .classes
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(EngineError::ClassNotFound { id })?;
        if let Some(name) = name {
            class.name = name.to_string();
        }
        if let Some(color) = color {
            class.color = color;
        }
        Ok(())
    }

    /// Get a class by id.
    pub fn get(&self, id: u32) -> Option<&ClassDef> {
        self.classes.iter().find(|c| c.id == id)
    }

    /// Get a class by name.
    pub fn get_by_name(&self, name: &str) -> Option<&ClassDef> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Check if a class id is live.
    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// All classes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.iter()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Snapshot of the table as a plain vector.
    pub fn to_vec(&self) -> Vec<ClassDef> {
        self.classes.clone()
    }

    fn check_name(&self, name: &str, allow_id: Option<u32>) -> Result<(), EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::invalid_class_name("name must not be empty"));
        }
        if self
            .classes
            .iter()
            .any(|c| c.name == name && Some(c.id) != allow_id)
        {
            return Err(EngineError::invalid_class_name(format!(
                "name '{}' already exists",
                name
            )));
        }
        Ok(())
    }

    fn next_color(&mut self) -> [u8; 3] {
        let color = if self.color_index < DEFAULT_COLORS.len() {
            DEFAULT_COLORS[self.color_index]
        } else {
            // Golden angle walk keeps later hues well separated
            let hue = (self.color_index as f32 * 137.5) % 360.0;
            hsv_to_rgb(hue, 0.7, 0.9)
        };
        self.color_index += 1;
        color
    }
}
