// Image and profile catalogs are small, curated reference data rather than
// tenant-owned rows; they are addressed by id or name but never mutated
// through the public API, so they live as a static in-process lookup instead
// of a repository-backed table.

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ImageCatalogEntry {
    pub id: &'static str,
    pub uri: &'static str,
}

pub const IMAGES: &[ImageCatalogEntry] = &[
    ImageCatalogEntry { id: "img_ubuntu2204", uri: "sandchest://linux/ubuntu-22.04" },
    ImageCatalogEntry { id: "img_ubuntu2404", uri: "sandchest://linux/ubuntu-24.04" },
    ImageCatalogEntry { id: "img_alpine319", uri: "sandchest://linux/alpine-3.19" },
];

pub fn find_image(id: &str) -> Option<&'static ImageCatalogEntry> {
    IMAGES.iter().find(|i| i.id == id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ProfileCatalogEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub cpu_cores: u32,
    pub memory_mb: u32,
}

pub const PROFILES: &[ProfileCatalogEntry] = &[
    ProfileCatalogEntry { id: "prof_small", name: "small", cpu_cores: 1, memory_mb: 1024 },
    ProfileCatalogEntry { id: "prof_medium", name: "medium", cpu_cores: 2, memory_mb: 4096 },
    ProfileCatalogEntry { id: "prof_large", name: "large", cpu_cores: 4, memory_mb: 8192 },
];

pub fn find_profile_by_name(name: &str) -> Option<&'static ProfileCatalogEntry> {
    PROFILES.iter().find(|p| p.name == name)
}

pub fn find_profile_by_id(id: &str) -> Option<&'static ProfileCatalogEntry> {
    PROFILES.iter().find(|p| p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profiles_are_addressable_by_name_and_id() {
        let by_name = find_profile_by_name("medium").unwrap();
        let by_id = find_profile_by_id("prof_medium").unwrap();
        assert_eq!(by_name.id, by_id.id);
    }

    #[test]
    fn unknown_image_is_none() {
        assert!(find_image("img_does_not_exist").is_none());
    }
}
