use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Teaching days for the weekly routine. Exams run Monday-Friday instead;
/// the two calendars are intentionally different.
pub const WEEK_DAYS: [&str; 5] = ["Sunday", "Monday", "Tuesday", "Wednesday", "Thursday"];

pub const CLASS_PERIODS: [&str; 5] = [
    "8:00 AM - 9:30 AM",
    "9:45 AM - 11:15 AM",
    "11:30 AM - 1:00 PM",
    "2:00 PM - 3:30 PM",
    "3:45 PM - 5:15 PM",
];

pub const EXAM_PERIODS: [(&str, &str); 3] = [
    ("9:00 AM", "11:00 AM"),
    ("12:00 PM", "2:00 PM"),
    ("3:00 PM", "5:00 PM"),
];

pub const MAX_CLASSES_PER_WEEK: usize = 3;
pub const MAX_EXAMS_PER_DAY: usize = 6;
pub const DEFAULT_SHUFFLE_SEED: u64 = 42;

/// Forward cursor bail-out: a course that cannot land within a year of the
/// start date is reported unassigned instead of walking the calendar forever.
const EXAM_HORIZON_DAYS: i64 = 365;

pub fn class_rooms() -> Vec<String> {
    (101..=120).map(|i| format!("Room {:03}", i)).collect()
}

pub fn exam_halls() -> Vec<String> {
    (1..=10).map(|i| format!("Exam Hall {:02}", i)).collect()
}

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Weekly class count for a course: whole credit hours, capped at three.
/// Half credits below 1.0 schedule nothing.
pub fn classes_per_week(credit_hour: f64) -> usize {
    if credit_hour <= 0.0 {
        return 0;
    }
    (credit_hour as usize).min(MAX_CLASSES_PER_WEEK)
}

#[derive(Debug, Clone)]
pub struct TeachingRow {
    pub course_id: String,
    pub teacher_id: String,
    pub credit_hour: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineSlot {
    pub course_id: String,
    pub teacher_id: String,
    pub day: String,
    pub time_slot: String,
    pub room: String,
    pub session: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineShortfall {
    pub course_id: String,
    pub teacher_id: String,
    pub requested: usize,
    pub scheduled: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutineOutcome {
    pub assigned: Vec<RoutineSlot>,
    pub unassigned: Vec<RoutineShortfall>,
}

/// Greedy first-fit routine generation. The course order, the day order per
/// class and the period order per day are all shuffled through the caller's
/// seeded generator; the first (day, period) where neither the teacher nor
/// the course is already booked wins and a room is drawn at random. A weekly
/// class with no free pair is dropped and reported, never retried.
pub fn generate_routine(
    rng: &mut StdRng,
    rows: &[TeachingRow],
    session: &str,
) -> RoutineOutcome {
    let rooms = class_rooms();

    let mut ordered: Vec<TeachingRow> = rows.to_vec();
    ordered.shuffle(rng);

    // Busy sets keyed by "day_period", one per teacher and one per course.
    let mut teacher_busy: HashMap<String, HashSet<String>> = HashMap::new();
    let mut course_busy: HashMap<String, HashSet<String>> = HashMap::new();

    let mut assigned = Vec::new();
    let mut unassigned = Vec::new();

    for row in &ordered {
        let requested = classes_per_week(row.credit_hour);
        let mut scheduled = 0_usize;

        for _ in 0..requested {
            let mut days: Vec<&str> = WEEK_DAYS.to_vec();
            days.shuffle(rng);

            'search: for day in &days {
                let mut periods: Vec<&str> = CLASS_PERIODS.to_vec();
                periods.shuffle(rng);

                for period in &periods {
                    let key = format!("{}_{}", day, period);
                    let teacher_taken = teacher_busy
                        .get(&row.teacher_id)
                        .map_or(false, |s| s.contains(&key));
                    let course_taken = course_busy
                        .get(&row.course_id)
                        .map_or(false, |s| s.contains(&key));
                    if teacher_taken || course_taken {
                        continue;
                    }

                    teacher_busy
                        .entry(row.teacher_id.clone())
                        .or_default()
                        .insert(key.clone());
                    course_busy
                        .entry(row.course_id.clone())
                        .or_default()
                        .insert(key);

                    let room = rooms[rng.gen_range(0..rooms.len())].clone();
                    assigned.push(RoutineSlot {
                        course_id: row.course_id.clone(),
                        teacher_id: row.teacher_id.clone(),
                        day: day.to_string(),
                        time_slot: period.to_string(),
                        room,
                        session: session.to_string(),
                    });
                    scheduled += 1;
                    break 'search;
                }
            }
        }

        if scheduled < requested {
            unassigned.push(RoutineShortfall {
                course_id: row.course_id.clone(),
                teacher_id: row.teacher_id.clone(),
                requested,
                scheduled,
            });
        }
    }

    RoutineOutcome {
        assigned,
        unassigned,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSlot {
    pub course_id: String,
    pub exam_date: String,
    pub start_time: String,
    pub end_time: String,
    pub room: String,
    pub session: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExamOutcome {
    pub assigned: Vec<ExamSlot>,
    pub unassigned: Vec<String>,
}

fn is_exam_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Exam timetabling with a single forward-only date cursor shared across the
/// shuffled course list: each course probes the current day's windows in
/// fixed order and takes a random free hall; a full day (room-wise or via
/// the per-day cap) advances the cursor, so later courses only ever land on
/// the same date or later.
pub fn generate_exam_schedule(
    rng: &mut StdRng,
    course_ids: &[String],
    start_date: NaiveDate,
    session: &str,
) -> ExamOutcome {
    let halls = exam_halls();

    let mut ordered: Vec<String> = course_ids.to_vec();
    ordered.shuffle(rng);

    let mut used_rooms: HashMap<(NaiveDate, usize), HashSet<String>> = HashMap::new();
    let mut exams_per_day: HashMap<NaiveDate, usize> = HashMap::new();
    let horizon = start_date + Duration::days(EXAM_HORIZON_DAYS);

    let mut cursor = start_date;
    let mut assigned = Vec::new();
    let mut unassigned = Vec::new();

    'course: for course_id in &ordered {
        loop {
            while !is_exam_day(cursor) {
                cursor += Duration::days(1);
            }
            if cursor >= horizon {
                unassigned.push(course_id.clone());
                continue 'course;
            }
            if exams_per_day.get(&cursor).copied().unwrap_or(0) >= MAX_EXAMS_PER_DAY {
                cursor += Duration::days(1);
                continue;
            }

            for (window, (start_time, end_time)) in EXAM_PERIODS.iter().enumerate() {
                let used = used_rooms.entry((cursor, window)).or_default();
                let free: Vec<&str> = halls
                    .iter()
                    .map(|h| h.as_str())
                    .filter(|h| !used.contains(*h))
                    .collect();
                if free.is_empty() {
                    continue;
                }

                let room = free[rng.gen_range(0..free.len())].to_string();
                used.insert(room.clone());
                *exams_per_day.entry(cursor).or_insert(0) += 1;

                assigned.push(ExamSlot {
                    course_id: course_id.clone(),
                    exam_date: cursor.format("%Y-%m-%d").to_string(),
                    start_time: start_time.to_string(),
                    end_time: end_time.to_string(),
                    room,
                    session: session.to_string(),
                });
                continue 'course;
            }

            cursor += Duration::days(1);
        }
    }

    ExamOutcome {
        assigned,
        unassigned,
    }
}
