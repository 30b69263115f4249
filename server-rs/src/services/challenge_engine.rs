//! Rule evaluation for challenges.
//!
//! Everything here is pure: it takes challenge and progress rows by value or
//! reference, decides, and mutates in memory. Persisting the result (under a
//! row lock) is the caller's job, see `services::progress_tracker`.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::activity::ActivityEvent;
use crate::models::challenge::{Challenge, ChallengeCriteria, ChallengeInput, ChallengeType};
use crate::models::progress::{ProgressStatus, UserChallengeProgress};

pub const MAX_TITLE_LEN: usize = 200;
/// Upper bound for `durationForUserDays` and `repeatIntervalDays`.
pub const MAX_WINDOW_DAYS: i32 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// Event type or criteria do not match, or the attempt is already finished.
    NotApplicable,
    /// The item behind the event was counted before.
    AlreadyCounted,
    Advanced { current: i32 },
    Completed,
    /// The attempt ran past its deadline and is now FAILED.
    Expired,
}

impl ProgressOutcome {
    pub fn changed_row(&self) -> bool {
        matches!(
            self,
            ProgressOutcome::Advanced { .. } | ProgressOutcome::Completed | ProgressOutcome::Expired
        )
    }
}

const GENRE_IDS: &str = "genreIds";
const MOVIE_IDS: &str = "movieIds";
const SERIES_IDS: &str = "seriesIds";
const COMIC_IDS: &str = "comicIds";
const MIN_RATING: &str = "minRating";
const CONTENT_TYPE: &str = "contentType";
const MIN_ITEMS: &str = "minItems";

/// (allowed, required) criteria keys per challenge type.
fn criteria_shape(t: ChallengeType) -> (&'static [&'static str], &'static [&'static str]) {
    match t {
        ChallengeType::WatchMovies
        | ChallengeType::DailyLoginStreak
        | ChallengeType::AddFriends => (&[], &[]),
        ChallengeType::WatchGenre => (&[GENRE_IDS], &[GENRE_IDS]),
        ChallengeType::WatchSpecificMovies => (&[MOVIE_IDS], &[MOVIE_IDS]),
        ChallengeType::WatchEpisodes => (&[SERIES_IDS], &[]),
        ChallengeType::CompleteSeries => (&[SERIES_IDS, GENRE_IDS], &[]),
        ChallengeType::ReadChapters => (&[COMIC_IDS], &[]),
        ChallengeType::ReadComicGenre => (&[GENRE_IDS], &[GENRE_IDS]),
        ChallengeType::CompleteComics => (&[COMIC_IDS, GENRE_IDS], &[]),
        ChallengeType::RateContent => (&[MIN_RATING, CONTENT_TYPE], &[]),
        ChallengeType::CreateCollection => (&[MIN_ITEMS], &[]),
    }
}

fn present_keys(c: &ChallengeCriteria) -> Vec<&'static str> {
    let mut keys = Vec::new();
    if c.genre_ids.is_some() {
        keys.push(GENRE_IDS);
    }
    if c.movie_ids.is_some() {
        keys.push(MOVIE_IDS);
    }
    if c.series_ids.is_some() {
        keys.push(SERIES_IDS);
    }
    if c.comic_ids.is_some() {
        keys.push(COMIC_IDS);
    }
    if c.min_rating.is_some() {
        keys.push(MIN_RATING);
    }
    if c.content_type.is_some() {
        keys.push(CONTENT_TYPE);
    }
    if c.min_items.is_some() {
        keys.push(MIN_ITEMS);
    }
    keys
}

pub fn validate_criteria(t: ChallengeType, c: &ChallengeCriteria) -> Result<(), String> {
    let (allowed, required) = criteria_shape(t);
    let present = present_keys(c);

    if let Some(extra) = present.iter().find(|k| !allowed.contains(*k)) {
        return Err(format!("criteria.{extra} is not used by {t:?} challenges"));
    }
    if let Some(missing) = required.iter().find(|k| !present.contains(*k)) {
        return Err(format!("criteria.{missing} is required for {t:?} challenges"));
    }

    let empty_list = [
        (GENRE_IDS, c.genre_ids.as_ref().map(Vec::is_empty)),
        (MOVIE_IDS, c.movie_ids.as_ref().map(Vec::is_empty)),
        (SERIES_IDS, c.series_ids.as_ref().map(Vec::is_empty)),
        (COMIC_IDS, c.comic_ids.as_ref().map(Vec::is_empty)),
    ]
    .into_iter()
    .find(|(_, empty)| *empty == Some(true));
    if let Some((key, _)) = empty_list {
        return Err(format!("criteria.{key} must not be empty"));
    }

    if let Some(r) = c.min_rating {
        if !(1..=10).contains(&r) {
            return Err("criteria.minRating must be between 1 and 10".into());
        }
    }
    if let Some(n) = c.min_items {
        if n < 1 {
            return Err("criteria.minItems must be at least 1".into());
        }
    }
    Ok(())
}

/// Validates an admin create/update body.
pub fn validate_input(input: &ChallengeInput) -> AppResult<()> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::BadRequest(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    if input.target_count < 1 {
        return Err(AppError::BadRequest("targetCount must be at least 1".into()));
    }
    if input.points_reward < 0 {
        return Err(AppError::BadRequest("pointsReward must not be negative".into()));
    }
    if input.required_level < 1 {
        return Err(AppError::BadRequest("requiredLevel must be at least 1".into()));
    }
    if let (Some(start), Some(end)) = (input.start_date, input.end_date) {
        if start >= end {
            return Err(AppError::BadRequest("startDate must be before endDate".into()));
        }
    }
    if matches!(input.duration_for_user_days, Some(d) if !(1..=MAX_WINDOW_DAYS).contains(&d)) {
        return Err(AppError::BadRequest(format!(
            "durationForUserDays must be between 1 and {MAX_WINDOW_DAYS}"
        )));
    }
    if input.is_repeatable && !matches!(input.repeat_interval_days, Some(d) if d >= 1) {
        return Err(AppError::BadRequest(
            "repeatIntervalDays must be at least 1 for repeatable challenges".into(),
        ));
    }
    if matches!(input.repeat_interval_days, Some(d) if !(1..=MAX_WINDOW_DAYS).contains(&d)) {
        return Err(AppError::BadRequest(format!(
            "repeatIntervalDays must be between 1 and {MAX_WINDOW_DAYS}"
        )));
    }
    validate_criteria(input.challenge_type, &input.criteria).map_err(AppError::BadRequest)?;

    if input.challenge_type == ChallengeType::WatchSpecificMovies {
        let listed = input.criteria.movie_ids.as_ref().map_or(0, |ids| {
            let mut ids = ids.clone();
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        });
        if input.target_count as usize > listed {
            return Err(AppError::BadRequest(
                "targetCount exceeds the number of listed movies".into(),
            ));
        }
    }
    Ok(())
}

fn matches_any_genre(filter: &Option<Vec<i32>>, genres: &[i32]) -> bool {
    filter
        .as_ref()
        .map_or(true, |wanted| wanted.iter().any(|g| genres.contains(g)))
}

fn matches_id(filter: &Option<Vec<i64>>, id: i64) -> bool {
    filter.as_ref().map_or(true, |ids| ids.contains(&id))
}

/// Key under which `event` would be counted for a challenge of type `t`, or
/// `None` if the event does not qualify.
pub fn item_key(t: ChallengeType, c: &ChallengeCriteria, event: &ActivityEvent) -> Option<String> {
    use ActivityEvent as E;
    use ChallengeType as T;

    match (t, event) {
        (T::WatchMovies, E::MovieWatched { movie_id, .. }) => Some(format!("movie:{movie_id}")),
        (T::WatchGenre, E::MovieWatched { movie_id, genre_ids }) => {
            (c.genre_ids.is_some() && matches_any_genre(&c.genre_ids, genre_ids))
                .then(|| format!("movie:{movie_id}"))
        }
        (T::WatchSpecificMovies, E::MovieWatched { movie_id, .. }) => {
            (c.movie_ids.is_some() && matches_id(&c.movie_ids, *movie_id))
                .then(|| format!("movie:{movie_id}"))
        }
        (T::WatchEpisodes, E::EpisodeWatched { episode_id, series_id, .. }) => {
            matches_id(&c.series_ids, *series_id).then(|| format!("episode:{episode_id}"))
        }
        (T::CompleteSeries, E::SeriesCompleted { series_id, genre_ids }) => {
            (matches_id(&c.series_ids, *series_id) && matches_any_genre(&c.genre_ids, genre_ids))
                .then(|| format!("series:{series_id}"))
        }
        (T::ReadChapters, E::ChapterRead { chapter_id, comic_id, .. }) => {
            matches_id(&c.comic_ids, *comic_id).then(|| format!("chapter:{chapter_id}"))
        }
        (T::ReadComicGenre, E::ChapterRead { chapter_id, genre_ids, .. }) => {
            (c.genre_ids.is_some() && matches_any_genre(&c.genre_ids, genre_ids))
                .then(|| format!("chapter:{chapter_id}"))
        }
        (T::CompleteComics, E::ComicCompleted { comic_id, genre_ids }) => {
            (matches_id(&c.comic_ids, *comic_id) && matches_any_genre(&c.genre_ids, genre_ids))
                .then(|| format!("comic:{comic_id}"))
        }
        (T::RateContent, E::RatingSubmitted { content_type, content_id, rating }) => {
            let kind_ok = c.content_type.map_or(true, |k| k == *content_type);
            let rating_ok = c.min_rating.map_or(true, |min| *rating >= min);
            (kind_ok && rating_ok).then(|| format!("rating:{}:{content_id}", content_type.as_str()))
        }
        (T::DailyLoginStreak, E::Login { date }) => Some(format!("login:{date}")),
        (T::AddFriends, E::FriendAdded { friend_id }) => Some(format!("friend:{friend_id}")),
        (T::CreateCollection, E::CollectionCreated { collection_id, item_count }) => {
            let size_ok = c.min_items.map_or(true, |min| *item_count >= min);
            size_ok.then(|| format!("collection:{collection_id}"))
        }
        _ => None,
    }
}

/// Applies one event to an attempt. The counter never passes the target
/// and the status only moves forward.
pub fn apply_event(
    challenge: &Challenge,
    progress: &mut UserChallengeProgress,
    event: &ActivityEvent,
    now: DateTime<Utc>,
) -> ProgressOutcome {
    if progress.status != ProgressStatus::InProgress {
        return ProgressOutcome::NotApplicable;
    }
    if progress.is_expired_at(now) {
        return match progress.transition(ProgressStatus::Failed, now) {
            Ok(()) => ProgressOutcome::Expired,
            Err(_) => ProgressOutcome::NotApplicable,
        };
    }

    let Some(key) = item_key(challenge.challenge_type, &challenge.criteria, event) else {
        return ProgressOutcome::NotApplicable;
    };
    let target = challenge.target_count.max(1);
    let details = &mut progress.progress_details.0;

    if let ActivityEvent::Login { date } = event {
        if details.contains(&key) || details.last_login_date.map_or(false, |last| *date < last) {
            return ProgressOutcome::AlreadyCounted;
        }
        let consecutive = details
            .last_login_date
            .map_or(false, |last| date.pred_opt() == Some(last));
        progress.current_count = if consecutive {
            (progress.current_count + 1).min(target)
        } else {
            1
        };
        details.record(key);
        details.last_login_date = Some(*date);
    } else {
        if !details.record(key) {
            return ProgressOutcome::AlreadyCounted;
        }
        progress.current_count = (progress.current_count + 1).min(target);
    }

    if progress.current_count >= target {
        if progress.transition(ProgressStatus::Completed, now).is_ok() {
            return ProgressOutcome::Completed;
        }
    }
    ProgressOutcome::Advanced {
        current: progress.current_count,
    }
}

/// Re-checks a running attempt after an admin edit of its challenge. The
/// counter is clamped to the current target and an attempt that already
/// meets it completes.
pub fn retarget(
    challenge: &Challenge,
    progress: &mut UserChallengeProgress,
    now: DateTime<Utc>,
) -> ProgressOutcome {
    if progress.status != ProgressStatus::InProgress {
        return ProgressOutcome::NotApplicable;
    }
    let target = challenge.target_count.max(1);
    let clamped = progress.current_count > target;
    progress.current_count = progress.current_count.min(target);

    if progress.is_expired_at(now) {
        return match progress.transition(ProgressStatus::Failed, now) {
            Ok(()) => ProgressOutcome::Expired,
            Err(_) => ProgressOutcome::NotApplicable,
        };
    }
    if progress.current_count >= target
        && progress.transition(ProgressStatus::Completed, now).is_ok()
    {
        return ProgressOutcome::Completed;
    }
    if clamped {
        ProgressOutcome::Advanced {
            current: progress.current_count,
        }
    } else {
        ProgressOutcome::NotApplicable
    }
}

fn plus_days(at: DateTime<Utc>, days: i32) -> Option<DateTime<Utc>> {
    at.checked_add_signed(Duration::seconds(i64::from(days) * 86_400))
}

/// Deadline for an attempt started at `started_at`: the per-user duration,
/// capped by the challenge's end date. A duration past the representable
/// range counts as no personal deadline.
pub fn user_deadline(challenge: &Challenge, started_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let personal = challenge
        .duration_for_user_days
        .and_then(|days| plus_days(started_at, days));
    match (personal, challenge.end_date) {
        (Some(p), Some(end)) => Some(p.min(end)),
        (p, end) => p.or(end),
    }
}

/// When a repeatable challenge may be joined again, given earlier attempts.
pub fn next_repeat_at(
    challenge: &Challenge,
    attempts: &[UserChallengeProgress],
) -> Option<DateTime<Utc>> {
    let interval = challenge.repeat_interval_days.unwrap_or(0).max(0);
    attempts
        .iter()
        .filter(|a| {
            matches!(
                a.status,
                ProgressStatus::Completed | ProgressStatus::RewardClaimed
            )
        })
        .filter_map(|a| a.completed_at)
        .max()
        .map(|last| plus_days(last, interval).unwrap_or(DateTime::<Utc>::MAX_UTC))
}

/// Decides whether a user at `user_level` may start a new attempt. Returns
/// the deadline the new attempt gets.
pub fn check_join(
    challenge: &Challenge,
    attempts: &[UserChallengeProgress],
    user_level: i32,
    now: DateTime<Utc>,
) -> AppResult<Option<DateTime<Utc>>> {
    if !challenge.is_open_at(now) {
        return Err(AppError::BadRequest(
            "Challenge is not currently available".into(),
        ));
    }
    if user_level < challenge.required_level {
        return Err(AppError::Forbidden(format!(
            "Requires level {}",
            challenge.required_level
        )));
    }
    if attempts
        .iter()
        .any(|a| a.status == ProgressStatus::InProgress && !a.is_expired_at(now))
    {
        return Err(AppError::Conflict("Challenge already joined".into()));
    }

    if challenge.is_repeatable {
        if let Some(next) = next_repeat_at(challenge, attempts) {
            if now < next {
                return Err(AppError::Conflict(format!(
                    "Challenge can be repeated after {}",
                    next.to_rfc3339()
                )));
            }
        }
    } else if attempts.iter().any(|a| {
        matches!(
            a.status,
            ProgressStatus::Completed | ProgressStatus::RewardClaimed
        )
    }) {
        return Err(AppError::Conflict("Challenge already completed".into()));
    }

    Ok(user_deadline(challenge, now))
}

/// Checks that `user_id` may claim the reward of `progress` right now.
pub fn check_claim(progress: &UserChallengeProgress, user_id: Uuid) -> AppResult<()> {
    if progress.user_id != user_id {
        return Err(AppError::NotFound("Progress not found".into()));
    }
    match progress.status {
        ProgressStatus::Completed => Ok(()),
        ProgressStatus::RewardClaimed => Err(AppError::Conflict("Reward already claimed".into())),
        ProgressStatus::InProgress | ProgressStatus::Failed => Err(AppError::BadRequest(
            "Challenge is not completed".into(),
        )),
    }
}
