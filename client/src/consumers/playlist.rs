//! Wedding music playlist editor.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tether_engine::{FieldDef, FieldType, ListShape, ObjectShape, Result, Revision, ShapeDescriptor};

use super::numbers::opt_u32_lenient;
use super::SyncContext;
use crate::{DocumentKey, SyncEngine};

/// Shape version of the music document.
pub const MUSIC_SHAPE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify_track_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    /// Length in seconds
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_u32_lenient"
    )]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Song {
    /// A song without an id yet; one is assigned when it is added.
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            artist: artist.into(),
            spotify_url: None,
            spotify_track_id: None,
            album_cover: None,
            preview_url: None,
            duration: None,
            notes: None,
        }
    }

    fn apply(&mut self, patch: SongPatch) {
        let SongPatch {
            title,
            artist,
            spotify_url,
            spotify_track_id,
            album_cover,
            preview_url,
            duration,
            notes,
        } = patch;

        if let Some(title) = title {
            self.title = title;
        }
        if let Some(artist) = artist {
            self.artist = artist;
        }
        self.spotify_url = spotify_url.or(self.spotify_url.take());
        self.spotify_track_id = spotify_track_id.or(self.spotify_track_id.take());
        self.album_cover = album_cover.or(self.album_cover.take());
        self.preview_url = preview_url.or(self.preview_url.take());
        self.duration = duration.or(self.duration);
        self.notes = notes.or(self.notes.take());
    }
}

/// Partial update for a [`Song`]; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SongPatch {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub spotify_url: Option<String>,
    pub spotify_track_id: Option<String>,
    pub album_cover: Option<String>,
    pub preview_url: Option<String>,
    pub duration: Option<u32>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicCategory {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub songs: Vec<Song>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub name: String,
    pub contact: String,
    pub email: String,
}

/// The synced music document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicData {
    pub vendor: Vendor,
    pub categories: Vec<MusicCategory>,
}

impl Default for MusicData {
    fn default() -> Self {
        Self {
            vendor: Vendor::default(),
            categories: default_categories(),
        }
    }
}

/// The category catalogue in its default order.
pub fn default_categories() -> Vec<MusicCategory> {
    let category = |id: &str, name: &str, description: &str, icon: &str, required: bool| MusicCategory {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        songs: Vec::new(),
        required,
    };

    vec![
        category("groom-entrance", "Groom's entrance", "Music as the groom walks to the altar", "🤵", true),
        category("bridesmaids-entrance", "Bridesmaids' entrance", "Music for the bridesmaids", "👰‍♀️", true),
        category("bride-entrance", "Bride's entrance", "The big moment: the bride arrives", "💍", true),
        category("signing", "Signing", "Music while the documents are signed", "✍️", false),
        category("congratulations", "Congratulations", "Music while guests congratulate", "🎉", false),
        category("guard-of-honor", "Guard of honor", "Music as the couple leaves through the guard of honor", "🎊", false),
        category("first-dance", "First dance", "Your first dance as a married couple", "💃", true),
        category("parent-dance", "Parent dance", "Bride with her father, groom with his mother", "👨‍👩‍👧", false),
        category("cake-cutting", "Cake cutting", "Music while the cake is cut", "🎂", false),
        category("party-must-have", "Party must-haves", "Songs that get the party going", "🎵", false),
        category("party-favorites", "Party favorites", "Your favorite party songs", "🎶", false),
        category("slow-songs", "Slow songs", "Romantic songs for slow dances", "💕", false),
        category("do-not-play", "Do not play", "Songs you never want to hear", "🚫", false),
    ]
}

/// Document shape for the music playlist.
pub fn music_shape() -> ShapeDescriptor {
    let song = ObjectShape::new(vec![
        FieldDef::required("id", FieldType::String, json!("")),
        FieldDef::required("title", FieldType::String, json!("")),
        FieldDef::required("artist", FieldType::String, json!("")),
        FieldDef::optional("spotifyUrl", FieldType::String),
        FieldDef::optional("spotifyTrackId", FieldType::String),
        FieldDef::optional("albumCover", FieldType::String),
        FieldDef::optional("previewUrl", FieldType::String),
        FieldDef::optional("duration", FieldType::Number),
        FieldDef::optional("notes", FieldType::String),
    ]);
    let category = ObjectShape::new(vec![
        FieldDef::required("id", FieldType::String, json!("")),
        FieldDef::required("name", FieldType::String, json!("")),
        FieldDef::required("description", FieldType::String, json!("")),
        FieldDef::required("icon", FieldType::String, json!("")),
        FieldDef::list("songs", ListShape::open(song)),
        FieldDef::required("required", FieldType::Bool, json!(false)),
    ]);
    let vendor = ObjectShape::new(vec![
        FieldDef::required("name", FieldType::String, json!("")),
        FieldDef::required("contact", FieldType::String, json!("")),
        FieldDef::required("email", FieldType::String, json!("")),
    ]);

    let catalogue = default_categories()
        .iter()
        .filter_map(|c| serde_json::to_value(c).ok())
        .collect();

    ShapeDescriptor::new(
        MUSIC_SHAPE_VERSION,
        vec![
            FieldDef::object("vendor", vendor),
            FieldDef::list("categories", ListShape::keyed("id", category, catalogue)),
        ],
    )
}

/// Edits the music playlist of one wedding.
#[derive(Debug)]
pub struct PlaylistEditor {
    engine: SyncEngine<MusicData>,
}

impl PlaylistEditor {
    pub fn open(ctx: &SyncContext, user_id: &str, wedding_id: &str) -> Result<Self> {
        let key = DocumentKey::new("music", user_id, wedding_id);
        let engine = ctx.engine(key, MusicData::default(), music_shape())?;
        Ok(Self { engine })
    }

    pub fn engine(&self) -> &SyncEngine<MusicData> {
        &self.engine
    }

    pub fn music(&self) -> MusicData {
        self.engine.current_state()
    }

    pub fn update_vendor(&self, vendor: Vendor) -> Result<Revision> {
        self.engine.mutate(|music| MusicData {
            vendor,
            ..music.clone()
        })
    }

    /// Append `song` to a category. Returns the song id, or `None` if the
    /// category does not exist.
    pub fn add_song(&self, category_id: &str, mut song: Song) -> Result<Option<String>> {
        if !self.has_category(category_id) {
            return Ok(None);
        }
        if song.id.is_empty() {
            song.id = format!("song-{}", uuid::Uuid::new_v4());
        }

        let id = song.id.clone();
        self.update_category(category_id, |category| category.songs.push(song))?;
        Ok(Some(id))
    }

    pub fn remove_song(&self, category_id: &str, song_id: &str) -> Result<Revision> {
        self.update_category(category_id, |category| {
            category.songs.retain(|s| s.id != song_id)
        })
    }

    pub fn update_song(&self, category_id: &str, song_id: &str, patch: SongPatch) -> Result<Revision> {
        self.update_category(category_id, |category| {
            if let Some(song) = category.songs.iter_mut().find(|s| s.id == song_id) {
                song.apply(patch);
            }
        })
    }

    pub fn total_songs(&self) -> usize {
        self.music().categories.iter().map(|c| c.songs.len()).sum()
    }

    pub fn required_categories(&self) -> Vec<MusicCategory> {
        self.music()
            .categories
            .into_iter()
            .filter(|c| c.required)
            .collect()
    }

    /// Number of required categories with at least one song.
    pub fn completed_required(&self) -> usize {
        self.required_categories()
            .iter()
            .filter(|c| !c.songs.is_empty())
            .count()
    }

    pub fn dispose(self) {
        self.engine.dispose();
    }

    fn has_category(&self, category_id: &str) -> bool {
        self.music().categories.iter().any(|c| c.id == category_id)
    }

    fn update_category<F>(&self, category_id: &str, change: F) -> Result<Revision>
    where
        F: FnOnce(&mut MusicCategory),
    {
        self.engine.mutate(|music| {
            let mut next = music.clone();
            if let Some(category) = next.categories.iter_mut().find(|c| c.id == category_id) {
                change(category);
            }
            next
        })
    }
}
