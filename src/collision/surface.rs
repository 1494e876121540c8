use serde::{Deserialize, Serialize};

use crate::config::{
    PHYSICS_DEFAULT_FRICTION, PHYSICS_DEFAULT_RESTITUTION, PHYSICS_DEFAULT_TIRE_FRICTION,
    PHYSICS_DEFAULT_TIRE_TRACTION,
};

/// Material properties shared by every surface carrying the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceParam {
    pub name: String,
    /// Index in the owning table.
    #[serde(skip)]
    pub id: i32,
    /// Contents bits a body needs to collide with this surface; `-1` means all.
    #[serde(default = "default_contents_mask", alias = "contentsMask")]
    pub contents_mask: i32,
    #[serde(default = "default_friction")]
    pub friction: f32,
    #[serde(default = "default_restitution")]
    pub restitution: f32,
    #[serde(default = "default_tire_friction", alias = "tirefriction")]
    pub tire_friction: f32,
    #[serde(default = "default_tire_traction", alias = "tirefriction_traction")]
    pub tire_traction: f32,
    /// One-letter sound/effect class.
    #[serde(default = "default_word", alias = "surfaceword")]
    pub word: char,
}

fn default_contents_mask() -> i32 {
    -1
}

fn default_friction() -> f32 {
    PHYSICS_DEFAULT_FRICTION
}

fn default_restitution() -> f32 {
    PHYSICS_DEFAULT_RESTITUTION
}

fn default_tire_friction() -> f32 {
    PHYSICS_DEFAULT_TIRE_FRICTION
}

fn default_tire_traction() -> f32 {
    PHYSICS_DEFAULT_TIRE_TRACTION
}

fn default_word() -> char {
    'C'
}

impl SurfaceParam {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: -1,
            contents_mask: default_contents_mask(),
            friction: PHYSICS_DEFAULT_FRICTION,
            restitution: PHYSICS_DEFAULT_RESTITUTION,
            tire_friction: PHYSICS_DEFAULT_TIRE_FRICTION,
            tire_traction: PHYSICS_DEFAULT_TIRE_TRACTION,
            word: default_word(),
        }
    }

    /// Whether a body with `contents` may touch this surface.
    pub fn allows_contents(&self, contents: u32) -> bool {
        (self.contents_mask as u32 & contents) == contents
    }
}

/// Per-world registry of surface parameters, indexed by insertion order.
#[derive(Debug, Clone, Default)]
pub struct SurfaceParamTable {
    params: Vec<SurfaceParam>,
}

impl SurfaceParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `[{ "name": "asphalt", "friction": 0.7 }, ...]`; ids follow array order.
    /// Duplicate names are logged and skipped.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let defs: Vec<SurfaceParam> = serde_json::from_str(json)?;
        let mut table = Self::new();
        for def in defs {
            let name = def.name.clone();
            table.add(&name, def);
        }
        Ok(table)
    }

    /// Registers `def` under `name`; fails when the name is taken (case-insensitive).
    pub fn add(&mut self, name: &str, mut def: SurfaceParam) -> bool {
        if self.find_id(name).is_some() {
            log::error!("SurfaceParamTable::add - {name} already added");
            return false;
        }

        def.name = name.to_owned();
        def.id = self.params.len() as i32;
        self.params.push(def);
        true
    }

    pub fn find_id(&self, name: &str) -> Option<i32> {
        self.params
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
            .map(|i| i as i32)
    }

    pub fn find(&self, name: &str) -> Option<&SurfaceParam> {
        self.params.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, id: i32) -> Option<&SurfaceParam> {
        usize::try_from(id).ok().and_then(|i| self.params.get(i))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SurfaceParam> {
        self.params.iter()
    }

    pub fn clear(&mut self) {
        self.params.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_insertion_order() {
        let mut table = SurfaceParamTable::new();
        assert!(table.add("Asphalt", SurfaceParam::new("")));
        assert!(table.add("grass", SurfaceParam::new("")));
        assert_eq!(table.find_id("ASPHALT"), Some(0));
        assert_eq!(table.get(1).map(|p| p.name.as_str()), Some("grass"));
        assert!(table.get(-1).is_none());
        assert!(table.get(2).is_none());
    }

    #[test]
    fn contents_mask_checks_every_bit() {
        let mut param = SurfaceParam::new("water");
        assert!(param.allows_contents(0b1010));
        param.contents_mask = 0b0010;
        assert!(!param.allows_contents(0b1010));
        assert!(param.allows_contents(0b0010));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut table = SurfaceParamTable::new();
        assert!(table.add("ice", SurfaceParam::new("")));
        assert!(!table.add("ICE", SurfaceParam::new("")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let table = SurfaceParamTable::from_json_str(
            r#"[
                { "name": "asphalt", "friction": 0.7, "surfaceword": "A" },
                { "name": "mud", "tirefriction": 0.05, "contentsMask": 3 },
                { "name": "Asphalt" }
            ]"#,
        )
        .expect("valid json");

        assert_eq!(table.len(), 2);
        let asphalt = table.find("asphalt").expect("loaded");
        assert_eq!(asphalt.friction, 0.7);
        assert_eq!(asphalt.word, 'A');
        assert_eq!(asphalt.restitution, PHYSICS_DEFAULT_RESTITUTION);
        assert_eq!(asphalt.contents_mask, -1);

        let mud = table.get(1).expect("second entry");
        assert_eq!(mud.id, 1);
        assert_eq!(mud.tire_friction, 0.05);
        assert_eq!(mud.contents_mask, 3);
        assert_eq!(mud.tire_traction, PHYSICS_DEFAULT_TIRE_TRACTION);

        assert!(SurfaceParamTable::from_json_str("{ not json").is_err());
    }
}
