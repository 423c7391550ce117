//! Date range tool: turn phrases like "last week" into concrete dates.
//!
//! Weeks run Sunday through Saturday. All ranges are inclusive.

use async_trait::async_trait;
use chrono::{Datelike, Days, Local, Months, NaiveDate, Weekday};
use corvid_core::error::ToolError;
use corvid_core::tool::Tool;

const SUPPORTED: &str = "today, yesterday, tomorrow, this week, last week, next week, \
this month, last month, last N weeks, last N months, past N days, last N days, \
N weeks ago, N months ago, this/last/next <weekday>";

/// A parsed period description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Yesterday,
    Tomorrow,
    ThisWeek,
    LastWeek,
    NextWeek,
    ThisMonth,
    LastMonth,
    LastNWeeks(u32),
    LastNMonths(u32),
    PastNDays(u32),
    WeeksAgo(u32),
    MonthsAgo(u32),
    ThisWeekday(Weekday),
    LastWeekday(Weekday),
    NextWeekday(Weekday),
}

impl Period {
    /// Parse a period description. Empty input means "this week".
    pub fn parse(input: &str) -> Result<Self, ToolError> {
        let text = input.trim().to_lowercase();
        let words: Vec<&str> = text.split_whitespace().collect();

        let period = match words.as_slice() {
            [] => Self::ThisWeek,
            ["today"] => Self::Today,
            ["yesterday"] => Self::Yesterday,
            ["tomorrow"] => Self::Tomorrow,
            ["this", "week"] | ["this", "past", "week"] => Self::ThisWeek,
            ["last", "week"] | ["past", "week"] => Self::LastWeek,
            ["next", "week"] => Self::NextWeek,
            ["this", "month"] => Self::ThisMonth,
            ["last", "month"] | ["past", "month"] => Self::LastMonth,
            ["last", n, unit] | ["past", n, unit] => {
                let n = parse_count(n, &text)?;
                match unit.trim_end_matches('s') {
                    "day" => Self::PastNDays(n),
                    "week" => Self::LastNWeeks(n),
                    "month" => Self::LastNMonths(n),
                    _ => return Err(unrecognized(&text)),
                }
            }
            [n, unit, "ago"] => {
                let n = parse_count(n, &text)?;
                match unit.trim_end_matches('s') {
                    "week" => Self::WeeksAgo(n),
                    "month" => Self::MonthsAgo(n),
                    _ => return Err(unrecognized(&text)),
                }
            }
            [which @ ("this" | "last" | "next"), day] => {
                let weekday = day
                    .parse::<Weekday>()
                    .map_err(|_| unrecognized(&text))?;
                match *which {
                    "this" => Self::ThisWeekday(weekday),
                    "last" => Self::LastWeekday(weekday),
                    _ => Self::NextWeekday(weekday),
                }
            }
            _ => return Err(unrecognized(&text)),
        };
        Ok(period)
    }

    /// Resolve to an inclusive `(start, end, description)` relative to `today`.
    pub fn resolve(self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate, String), ToolError> {
        let week_start = week_start(today);
        let month_start = first_of_month(today);

        let range = match self {
            Self::Today => (today, today, "Today".to_string()),
            Self::Yesterday => {
                let day = sub_days(today, 1)?;
                (day, day, "Yesterday".to_string())
            }
            Self::Tomorrow => {
                let day = add_days(today, 1)?;
                (day, day, "Tomorrow".to_string())
            }
            Self::ThisWeek => {
                let end = add_days(week_start, 6)?;
                (week_start, end, format!("This week ({})", span(week_start, end)))
            }
            Self::LastWeek => {
                let start = sub_days(week_start, 7)?;
                let end = sub_days(week_start, 1)?;
                (start, end, format!("Last week ({})", span(start, end)))
            }
            Self::NextWeek => {
                let start = add_days(week_start, 7)?;
                let end = add_days(week_start, 13)?;
                (start, end, format!("Next week ({})", span(start, end)))
            }
            Self::ThisMonth => {
                let end = last_of_month(month_start)?;
                (month_start, end, format!("This month ({})", month_start.format("%b %Y")))
            }
            Self::LastMonth => {
                let start = sub_months(month_start, 1)?;
                let end = sub_days(month_start, 1)?;
                (start, end, format!("Last month ({})", start.format("%b %Y")))
            }
            Self::LastNWeeks(n) => {
                let start = sub_days(week_start, 7 * u64::from(n))?;
                let end = sub_days(week_start, 1)?;
                (start, end, format!("Last {n} weeks"))
            }
            Self::LastNMonths(n) => {
                let start = sub_months(month_start, n)?;
                let end = sub_days(month_start, 1)?;
                (start, end, format!("Last {n} months"))
            }
            Self::PastNDays(n) => {
                // Includes today.
                let start = sub_days(today, u64::from(n.saturating_sub(1)))?;
                (start, today, format!("Past {n} days"))
            }
            Self::WeeksAgo(n) => {
                let start = sub_days(week_start, 7 * u64::from(n))?;
                let end = add_days(start, 6)?;
                (start, end, format!("{n} weeks ago ({})", span(start, end)))
            }
            Self::MonthsAgo(n) => {
                let start = sub_months(month_start, n)?;
                let end = last_of_month(start)?;
                (start, end, format!("{n} months ago ({})", start.format("%b %Y")))
            }
            Self::ThisWeekday(day) => {
                let date = add_days(week_start, u64::from(day.num_days_from_sunday()))?;
                (date, date, format!("This {} ({})", day_name(day), date.format("%b %d")))
            }
            Self::LastWeekday(day) => {
                // Most recent strictly-past occurrence.
                let back = (7 + today.weekday().num_days_from_sunday()
                    - day.num_days_from_sunday())
                    % 7;
                let back = if back == 0 { 7 } else { back };
                let date = sub_days(today, u64::from(back))?;
                (date, date, format!("Last {} ({})", day_name(day), date.format("%b %d")))
            }
            Self::NextWeekday(day) => {
                let ahead = (7 + day.num_days_from_sunday()
                    - today.weekday().num_days_from_sunday())
                    % 7;
                let ahead = if ahead == 0 { 7 } else { ahead };
                let date = add_days(today, u64::from(ahead))?;
                (date, date, format!("Next {} ({})", day_name(day), date.format("%b %d")))
            }
        };
        Ok(range)
    }
}

fn parse_count(word: &str, text: &str) -> Result<u32, ToolError> {
    match word.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ToolError::InvalidArguments(format!(
            "Invalid count in period '{text}': expected a positive number, got '{word}'"
        ))),
    }
}

fn unrecognized(text: &str) -> ToolError {
    ToolError::InvalidArguments(format!(
        "Unrecognized period format: '{text}'. Supported: {SUPPORTED}"
    ))
}

fn out_of_range() -> ToolError {
    ToolError::InvalidArguments("Date range is out of the supported calendar range".into())
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_sunday()))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn last_of_month(first: NaiveDate) -> Result<NaiveDate, ToolError> {
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(out_of_range)
}

fn add_days(date: NaiveDate, n: u64) -> Result<NaiveDate, ToolError> {
    date.checked_add_days(Days::new(n)).ok_or_else(out_of_range)
}

fn sub_days(date: NaiveDate, n: u64) -> Result<NaiveDate, ToolError> {
    date.checked_sub_days(Days::new(n)).ok_or_else(out_of_range)
}

fn sub_months(date: NaiveDate, n: u32) -> Result<NaiveDate, ToolError> {
    date.checked_sub_months(Months::new(n)).ok_or_else(out_of_range)
}

fn span(start: NaiveDate, end: NaiveDate) -> String {
    format!("{} - {}", start.format("%b %d"), end.format("%b %d"))
}

fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

pub struct DateRangeTool;

#[async_trait]
impl Tool for DateRangeTool {
    fn name(&self) -> &str {
        "calculate_date_range"
    }

    fn description(&self) -> &str {
        "Calculate start and end dates for a time period description. Use this to convert \
         phrases like 'last week', 'past 7 days' or 'last monday' into exact dates before \
         querying calendars or mailboxes. Weeks run Sunday to Saturday."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "period": {
                    "type": "string",
                    "description": format!("Time period description. Supported: {SUPPORTED}")
                },
                "reference_date": {
                    "type": "string",
                    "description": "Optional reference date (YYYY-MM-DD). Defaults to today."
                }
            },
            "required": ["period"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let period_text = arguments["period"].as_str().unwrap_or("");
        let today = match arguments["reference_date"].as_str() {
            Some(s) if !s.trim().is_empty() => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|_| {
                    ToolError::InvalidArguments(format!(
                        "Invalid reference_date '{s}': expected YYYY-MM-DD"
                    ))
                })?,
            _ => Local::now().date_naive(),
        };

        let period = Period::parse(period_text)?;
        let (start, end, description) = period.resolve(today)?;

        let normalized = if period_text.trim().is_empty() {
            "this week".to_string()
        } else {
            period_text.trim().to_lowercase()
        };
        let result = serde_json::json!({
            "period": normalized,
            "start_date": start.format("%Y-%m-%d").to_string(),
            "end_date": end.format("%Y-%m-%d").to_string(),
            "description": description,
            "reference_date": today.format("%Y-%m-%d").to_string(),
        });
        serde_json::to_string_pretty(&result)
            .map_err(|e| ToolError::InvocationFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })
    }
}
