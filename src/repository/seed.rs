//! Deterministic demo content.
//!
//! Media assignment depends only on `(user_id, index)` so re-seeding is stable
//! for tests. Captions and the viewer roster contents are random.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rand::{seq::SliceRandom, Rng};

use crate::models::{Story, User};

const DEMO_USERS: [(i64, &str); 12] = [
    (1, "ava.lindqvist"),
    (2, "marco_builds"),
    (3, "noor.travels"),
    (4, "kenji.eats"),
    (5, "lucia_paints"),
    (6, "theo.runs"),
    (7, "priya.codes"),
    (8, "sam_outdoors"),
    (9, "ines.bakes"),
    (10, "olu.films"),
    (11, "hana.reads"),
    (12, "felix.surfs"),
];

const PHOTO_IDS: [u32; 16] = [
    10, 15, 16, 17, 28, 29, 37, 42, 48, 57, 64, 76, 82, 96, 104, 110,
];

const VIDEO_URLS: [&str; 3] = [
    "https://cdn.storyreel.dev/clips/sunset.mp4",
    "https://cdn.storyreel.dev/clips/city-walk.mp4",
    "https://cdn.storyreel.dev/clips/waves.mp4",
];

const CAPTIONS: [&str; 8] = [
    "golden hour",
    "not bad for a monday",
    "new spot unlocked",
    "can't stop thinking about this",
    "weekend mode",
    "swipe up for the recipe",
    "first try!",
    "okay one more",
];

/// Spacing between consecutive seeded stories of one user.
const STORY_SPACING_MINUTES: i64 = 47;

pub fn default_roster() -> Vec<User> {
    DEMO_USERS
        .iter()
        .map(|(id, name)| User::new(*id, *name))
        .collect()
}

pub fn story_count_for(user_id: i64) -> usize {
    (user_id.rem_euclid(6) + 1) as usize
}

fn slot_for(user_id: i64, index: usize) -> u64 {
    (user_id.unsigned_abs())
        .wrapping_mul(31)
        .wrapping_add(index as u64 * 7)
}

/// Media reference for the `index`-th story of `user_id`. Every fifth slot is a video.
pub fn media_for(user_id: i64, index: usize) -> String {
    let slot = slot_for(user_id, index);
    if slot % 5 == 4 {
        let url = VIDEO_URLS[(slot as usize / 5) % VIDEO_URLS.len()];
        format!("video://{url}")
    } else {
        let photo = PHOTO_IDS[slot as usize % PHOTO_IDS.len()];
        format!("https://picsum.photos/id/{photo}/1080/1920")
    }
}

pub fn viewer_count_for(user_id: i64, index: usize) -> usize {
    (slot_for(user_id, index) % 180 + 3) as usize
}

/// Builds one synthetic story for `(user_id, index)` created at `created_at`.
pub fn synthetic_story(user_id: i64, index: usize, created_at: DateTime<Utc>) -> Story {
    let mut rng = rand::thread_rng();
    let mut story = Story::new(user_id, media_for(user_id, index), created_at);

    story.viewer_ids = (0..viewer_count_for(user_id, index))
        .map(|_| rng.gen_range(100..100_000))
        .collect();
    if rng.gen_bool(0.6) {
        story.caption = CAPTIONS.choose(&mut rng).map(|caption| caption.to_string());
    }
    story
}

/// Seeds every roster user with `story_count_for(id)` stories, oldest first.
pub fn generate(users: &[User], now: DateTime<Utc>) -> BTreeMap<i64, Vec<Story>> {
    users
        .iter()
        .map(|user| {
            let count = story_count_for(user.id);
            let stories = (0..count)
                .map(|index| {
                    let age = (count - index) as i64 * STORY_SPACING_MINUTES;
                    synthetic_story(user.id, index, now - Duration::minutes(age))
                })
                .collect();
            (user.id, stories)
        })
        .collect()
}
