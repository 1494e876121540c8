use glam::Vec3;
use smallvec::SmallVec;

use crate::{
    config::PHYSICS_FILTER_MAX_OBJECTS,
    core::{
        collider::CollisionObject,
        types::{BodyId, ObjectHandle},
    },
};

/// Closest hit reported by a line or sweep query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionInfo {
    pub position: Vec3,
    pub normal: Vec3,
    /// Fraction of the segment at the hit, in `[0, 1)`.
    pub fract: f32,
    /// Surface parameter at the hit point, `-1` when none.
    pub material_index: i32,
    pub hit_object: Option<ObjectHandle>,
}

impl CollisionInfo {
    pub(crate) fn miss(end: Vec3, fract: f32) -> Self {
        Self {
            position: end,
            normal: Vec3::ZERO,
            fract,
            material_index: -1,
            hit_object: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    Exclude,
    IncludeOnly,
}

pub struct FilterFlags;

impl FilterFlags {
    pub const STATIC_OBJECTS: u32 = 1 << 0;
    pub const DYNAMIC_OBJECTS: u32 = 1 << 1;
    pub const BY_USERDATA: u32 = 1 << 2;
    pub const DISALLOW_STATIC: u32 = 1 << 3;
    pub const DISALLOW_DYNAMIC: u32 = 1 << 4;
    pub const FORCE_RAYCAST: u32 = 1 << 5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterEntry {
    Object(ObjectHandle),
    UserData(u64),
}

/// Include/exclude list applied to queries and contact generation.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionFilter {
    pub filter_type: FilterType,
    pub flags: u32,
    pub ignore_contents_mask: u32,
    objects: SmallVec<[FilterEntry; PHYSICS_FILTER_MAX_OBJECTS]>,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self {
            filter_type: FilterType::Exclude,
            flags: FilterFlags::STATIC_OBJECTS | FilterFlags::DYNAMIC_OBJECTS,
            ignore_contents_mask: 0,
            objects: SmallVec::new(),
        }
    }
}

impl CollisionFilter {
    pub fn new(filter_type: FilterType, flags: u32) -> Self {
        Self {
            filter_type,
            flags,
            ..Self::default()
        }
    }

    /// Filter that skips one body, the usual "ignore myself" query.
    pub fn excluding_body(body: BodyId) -> Self {
        let mut filter = Self::default();
        filter.add_object(ObjectHandle::Body(body));
        filter
    }

    /// Adds an object; silently ignored once the filter is full.
    pub fn add_object(&mut self, handle: ObjectHandle) {
        self.push(FilterEntry::Object(handle));
    }

    pub fn add_user_data(&mut self, user_data: u64) {
        self.push(FilterEntry::UserData(user_data));
    }

    fn push(&mut self, entry: FilterEntry) {
        if self.objects.len() < PHYSICS_FILTER_MAX_OBJECTS {
            self.objects.push(entry);
        }
    }

    pub fn has_entry(&self, entry: FilterEntry) -> bool {
        self.objects.contains(&entry)
    }

    pub fn entries(&self) -> &[FilterEntry] {
        &self.objects
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    /// Whether the filter lets a query or contact test touch `object`.
    pub fn allows(&self, handle: ObjectHandle, object: &CollisionObject, is_dynamic: bool) -> bool {
        if object.contents & self.ignore_contents_mask != 0 {
            return false;
        }

        let check_static = self.flags & FilterFlags::STATIC_OBJECTS != 0 && !is_dynamic;
        let check_dynamic = self.flags & FilterFlags::DYNAMIC_OBJECTS != 0 && is_dynamic;
        if !(check_static || check_dynamic) {
            return true;
        }

        let entry = if self.flags & FilterFlags::BY_USERDATA != 0 {
            FilterEntry::UserData(object.user_data)
        } else {
            FilterEntry::Object(handle)
        };

        match self.filter_type {
            FilterType::IncludeOnly => self.has_entry(entry),
            FilterType::Exclude => !self.has_entry(entry),
        }
    }
}

/// `true` when there is no filter or it allows the object.
pub fn check_allow_contact_test(
    filter: Option<&CollisionFilter>,
    handle: ObjectHandle,
    object: &CollisionObject,
    is_dynamic: bool,
) -> bool {
    filter.map_or(true, |f| f.allows(handle, object, is_dynamic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::types::ObjectId, utils::EntityId};

    fn handle(index: u32) -> ObjectHandle {
        ObjectHandle::Object(ObjectId(EntityId::new(index, 0)))
    }

    #[test]
    fn add_object_caps_silently() {
        let mut filter = CollisionFilter::default();
        for i in 0..(PHYSICS_FILTER_MAX_OBJECTS as u32 + 3) {
            filter.add_object(handle(i));
        }
        assert_eq!(filter.entries().len(), PHYSICS_FILTER_MAX_OBJECTS);
        assert!(!filter.has_entry(FilterEntry::Object(handle(PHYSICS_FILTER_MAX_OBJECTS as u32))));
    }

    #[test]
    fn include_and_exclude_by_user_data() {
        let mut object = CollisionObject::new();
        object.user_data = 42;

        let mut include = CollisionFilter::new(
            FilterType::IncludeOnly,
            FilterFlags::STATIC_OBJECTS | FilterFlags::BY_USERDATA,
        );
        assert!(!include.allows(handle(0), &object, false));
        include.add_user_data(42);
        assert!(include.allows(handle(0), &object, false));
        // dynamic objects are not covered by the flags
        assert!(CollisionFilter::new(FilterType::IncludeOnly, FilterFlags::STATIC_OBJECTS)
            .allows(handle(0), &object, true));

        let mut exclude = CollisionFilter::default();
        exclude.add_object(handle(0));
        assert!(!exclude.allows(handle(0), &object, false));
        assert!(exclude.allows(handle(1), &object, false));
    }

    #[test]
    fn ignored_contents_are_rejected() {
        let mut object = CollisionObject::new();
        object.contents = 0b100;
        let filter = CollisionFilter {
            ignore_contents_mask: 0b100,
            ..CollisionFilter::default()
        };
        assert!(!filter.allows(handle(0), &object, false));
        assert!(check_allow_contact_test(None, handle(0), &object, false));
    }
}
