//! todo.txt domain library.
//! One task per line: completion marker, priority, dates, free text, and inline
//! `@context`, `+project` and `key:value` annotations. The core stays pure (line in,
//! line out); file and stream handling lives in `storage`.

pub mod core {
    use chrono::{Duration, Local, NaiveDate};
    use serde::{Deserialize, Serialize};
    use std::{
        collections::{BTreeMap, BTreeSet},
        fmt,
    };

    /* ------------------------------- IDs ------------------------------- */

    /// Position-derived identity inside a `TaskList`. `TaskId(0)` means unassigned.
    #[derive(
        Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    )]
    #[serde(transparent)]
    pub struct TaskId(pub u32);

    impl TaskId {
        pub fn is_assigned(self) -> bool {
            self.0 != 0
        }

        pub fn next(self) -> Self {
            Self(self.0 + 1)
        }
    }

    impl fmt::Display for TaskId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Display::fmt(&self.0, f)
        }
    }

    /* ---------------------------- Value Objects ---------------------------- */

    /// Single-letter priority `A`..=`Z`, written `(A)` in todo.txt.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(try_from = "char", into = "char")]
    pub struct Priority(char);

    impl Priority {
        pub fn new(letter: char) -> Option<Self> {
            letter.is_ascii_uppercase().then_some(Self(letter))
        }

        pub fn letter(self) -> char {
            self.0
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("priority must be a single letter A-Z, got {0:?}")]
    pub struct InvalidPriority(pub char);

    impl TryFrom<char> for Priority {
        type Error = InvalidPriority;

        fn try_from(letter: char) -> Result<Self, Self::Error> {
            Self::new(letter).ok_or(InvalidPriority(letter))
        }
    }

    impl From<Priority> for char {
        fn from(priority: Priority) -> Self {
            priority.0
        }
    }

    impl fmt::Display for Priority {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    /// Which structural date a value belongs to; used in parse errors and sorting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DateField {
        Created,
        Completed,
        Due,
    }

    impl fmt::Display for DateField {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                DateField::Created => "created",
                DateField::Completed => "completed",
                DateField::Due => "due",
            })
        }
    }

    /* ------------------------------ Entities ------------------------------ */

    /// One todo.txt entry.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Task {
        /// Assigned by the owning list (1-based, file order on load).
        pub id: TaskId,

        /// Raw trimmed line this task was parsed from; empty for tasks built in code.
        #[serde(default)]
        pub original: String,

        /// Free text left once every structural field has been stripped.
        pub description: String,

        pub priority: Option<Priority>,

        /// `+project` tokens, unique and always iterated in sorted order.
        #[serde(default)]
        pub projects: BTreeSet<String>,

        /// `@context` tokens, unique and always iterated in sorted order.
        #[serde(default)]
        pub contexts: BTreeSet<String>,

        /// `key:value` annotations except `due`, which has its own field.
        #[serde(default)]
        pub additional_tags: BTreeMap<String, String>,

        pub created_date: Option<NaiveDate>,
        pub due_date: Option<NaiveDate>,

        /// Only counts while `completed` is set; see [`Task::has_completed_date`].
        pub completed_date: Option<NaiveDate>,
        pub completed: bool,
    }

    impl Task {
        /// Empty task stamped with today's date as its creation date.
        pub fn new() -> Self {
            Self {
                created_date: Some(today()),
                ..Self::default()
            }
        }

        pub fn has_priority(&self) -> bool {
            self.priority.is_some()
        }

        pub fn has_created_date(&self) -> bool {
            self.created_date.is_some()
        }

        pub fn has_due_date(&self) -> bool {
            self.due_date.is_some()
        }

        pub fn has_completed_date(&self) -> bool {
            self.completed && self.completed_date.is_some()
        }

        /// The completion date, but only while the task is completed.
        pub fn effective_completed_date(&self) -> Option<NaiveDate> {
            self.completed_date.filter(|_| self.completed)
        }

        pub fn has_context(&self, context: &str) -> bool {
            self.contexts.contains(context)
        }

        pub fn has_project(&self, project: &str) -> bool {
            self.projects.contains(project)
        }

        /// Mark completed today. No-op for tasks that are already completed.
        pub fn complete(&mut self) {
            self.complete_on(today());
        }

        pub fn complete_on(&mut self, date: NaiveDate) {
            if !self.completed {
                self.completed = true;
                self.completed_date = Some(date);
            }
        }

        /// Clear the completed flag and the completion date.
        pub fn reopen(&mut self) {
            if self.completed {
                self.completed = false;
                self.completed_date = None;
            }
        }

        /// Due date lies in the past. The completed flag is not consulted.
        pub fn is_overdue(&self) -> bool {
            self.is_overdue_on(today())
        }

        pub fn is_overdue_on(&self, today: NaiveDate) -> bool {
            self.due_date.is_some_and(|due| due < today)
        }

        /// Signed distance from today to the due date, negative once overdue.
        pub fn due_in(&self) -> Option<Duration> {
            self.due_in_on(today())
        }

        pub fn due_in_on(&self, today: NaiveDate) -> Option<Duration> {
            self.due_date.map(|due| due - today)
        }
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn date(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
        }

        #[test]
        fn new_task_is_empty_but_dated() {
            let task = Task::new();
            assert_eq!(task.id, TaskId(0));
            assert!(task.original.is_empty());
            assert!(task.description.is_empty());
            assert!(!task.has_priority());
            assert!(task.projects.is_empty() && task.contexts.is_empty());
            assert!(task.additional_tags.is_empty());
            assert!(task.has_created_date());
            assert!(!task.has_completed_date());
            assert!(!task.has_due_date());
            assert!(!task.completed);
        }

        #[test]
        fn complete_and_reopen_track_completion_date() {
            let mut task = Task::default();
            task.complete_on(date(2014, 1, 4));
            assert!(task.completed);
            assert_eq!(task.completed_date, Some(date(2014, 1, 4)));

            // Already completed: the original date is kept.
            task.complete_on(date(2014, 2, 1));
            assert_eq!(task.completed_date, Some(date(2014, 1, 4)));

            task.reopen();
            assert!(!task.completed);
            assert_eq!(task.completed_date, None);
            assert!(!task.has_completed_date());
        }

        #[test]
        fn completed_date_needs_completed_flag() {
            let task = Task {
                completed_date: Some(date(2014, 1, 3)),
                ..Task::default()
            };
            assert!(!task.has_completed_date());
            assert_eq!(task.effective_completed_date(), None);
        }

        #[test]
        fn overdue_and_due_in() {
            let task = Task {
                due_date: Some(date(2014, 1, 12)),
                ..Task::default()
            };
            assert!(task.is_overdue_on(date(2014, 1, 13)));
            assert!(!task.is_overdue_on(date(2014, 1, 12)));
            assert_eq!(task.due_in_on(date(2014, 1, 10)).map(|d| d.num_days()), Some(2));
            assert_eq!(task.due_in_on(date(2014, 1, 15)).map(|d| d.num_days()), Some(-3));
            assert_eq!(Task::default().due_in_on(date(2014, 1, 10)), None);
            assert!(!Task::default().is_overdue_on(date(2014, 1, 10)));
        }

        #[test]
        fn task_id_honours_width() {
            assert_eq!(format!("{:>3}", TaskId(7)), "  7");
            assert_eq!(TaskId(12).to_string(), "12");
        }

        #[test]
        fn priority_accepts_only_uppercase_letters() {
            assert_eq!(Priority::new('C').map(Priority::letter), Some('C'));
            assert!(Priority::new('c').is_none());
            assert!(Priority::new('1').is_none());
            assert!(Priority::try_from('(').is_err());
        }
    }
}

pub mod config {
    //! Per-list settings: the date format shared by every date field, and whether
    //! `#`-prefixed lines are comments.
    //!
    //! A `DateFormat` is a chrono strftime string. It is split with `nom` into specifier and
    //! literal segments, from which a regex fragment matching the rendered shape is derived.
    //! The parser uses that fragment to spot date-shaped tokens, then chrono validates them.

    use chrono::NaiveDate;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::is_not,
        character::complete::{anychar, char},
        combinator::{all_consuming, map},
        error::VerboseError,
        multi::many1,
        sequence::preceded,
    };
    use serde::{Deserialize, Serialize};
    use std::{fmt, str::FromStr};

    pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
    const DEFAULT_DATE_PATTERN: &str = "[0-9]{4}-[0-9]{2}-[0-9]{2}";

    #[derive(Debug, thiserror::Error)]
    pub enum ConfigError {
        #[error("date format must not be empty")]
        EmptyDateFormat,
        #[error("malformed date format {0:?}")]
        MalformedDateFormat(String),
        #[error("unsupported date format specifier %{0}")]
        UnsupportedSpecifier(char),
        #[error("date format {0:?} must not contain whitespace")]
        WhitespaceInDateFormat(String),
        #[error("date format {0:?} does not describe a full calendar date")]
        IncompleteDateFormat(String),
        #[error("building field pattern")]
        Pattern(#[from] regex::Error),
    }

    /* ------------------------------- Config ------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Config {
        pub date_format: DateFormat,
        /// Skip lines that start with `#` once trimmed.
        pub ignore_comment_lines: bool,
    }

    impl Default for Config {
        fn default() -> Self {
            Self {
                date_format: DateFormat::default(),
                ignore_comment_lines: true,
            }
        }
    }

    /* ----------------------------- DateFormat ----------------------------- */

    /// Equality looks at the format string only; the pattern is derived from it.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct DateFormat {
        format: String,
        pattern: String,
    }

    impl DateFormat {
        pub fn new(format: impl Into<String>) -> Result<Self, ConfigError> {
            let format = format.into();
            if format.is_empty() {
                return Err(ConfigError::EmptyDateFormat);
            }
            if format.chars().any(char::is_whitespace) {
                return Err(ConfigError::WhitespaceInDateFormat(format));
            }

            let (_, segments) = format_segments(&format)
                .map_err(|_| ConfigError::MalformedDateFormat(format.clone()))?;

            let mut pattern = String::new();
            let mut coverage = Coverage::default();
            for segment in segments {
                match segment {
                    Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
                    Segment::Specifier(spec) => pattern.push_str(coverage.record(spec)?),
                }
            }
            if !coverage.is_complete() {
                return Err(ConfigError::IncompleteDateFormat(format));
            }

            Ok(Self { format, pattern })
        }

        pub fn as_str(&self) -> &str {
            &self.format
        }

        /// Regex fragment (no anchors, no groups) matching one date in this format.
        pub fn pattern(&self) -> &str {
            &self.pattern
        }

        pub fn parse(&self, text: &str) -> Result<NaiveDate, chrono::ParseError> {
            NaiveDate::parse_from_str(text, &self.format)
        }

        pub fn render(&self, date: NaiveDate) -> String {
            date.format(&self.format).to_string()
        }
    }

    impl Default for DateFormat {
        fn default() -> Self {
            Self {
                format: DEFAULT_DATE_FORMAT.to_string(),
                pattern: DEFAULT_DATE_PATTERN.to_string(),
            }
        }
    }

    impl PartialEq for DateFormat {
        fn eq(&self, other: &Self) -> bool {
            self.format == other.format
        }
    }

    impl Eq for DateFormat {}

    impl TryFrom<String> for DateFormat {
        type Error = ConfigError;

        fn try_from(format: String) -> Result<Self, Self::Error> {
            Self::new(format)
        }
    }

    impl From<DateFormat> for String {
        fn from(format: DateFormat) -> Self {
            format.format
        }
    }

    impl FromStr for DateFormat {
        type Err = ConfigError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Self::new(s)
        }
    }

    impl fmt::Display for DateFormat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.format)
        }
    }

    /// Tracks which calendar components a format names.
    #[derive(Default)]
    struct Coverage {
        year: bool,
        month: bool,
        day: bool,
        day_of_year: bool,
    }

    impl Coverage {
        fn record(&mut self, spec: char) -> Result<&'static str, ConfigError> {
            let fragment = match spec {
                'Y' => {
                    self.year = true;
                    "[0-9]{4}"
                }
                'y' => {
                    self.year = true;
                    "[0-9]{2}"
                }
                'm' => {
                    self.month = true;
                    "[0-9]{2}"
                }
                'd' => {
                    self.day = true;
                    "[0-9]{2}"
                }
                'j' => {
                    self.day_of_year = true;
                    "[0-9]{3}"
                }
                'F' => {
                    self.year = true;
                    self.month = true;
                    self.day = true;
                    DEFAULT_DATE_PATTERN
                }
                '%' => "%",
                other => return Err(ConfigError::UnsupportedSpecifier(other)),
            };
            Ok(fragment)
        }

        fn is_complete(&self) -> bool {
            self.year && ((self.month && self.day) || self.day_of_year)
        }
    }

    /* --------------------------- Format grammar --------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Segment<'a> {
        Specifier(char),
        Literal(&'a str),
    }

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    fn format_segments(i: &str) -> PResult<'_, Vec<Segment<'_>>> {
        all_consuming(many1(alt((specifier, literal))))(i)
    }

    fn specifier(i: &str) -> PResult<'_, Segment<'_>> {
        map(preceded(char('%'), anychar), Segment::Specifier)(i)
    }

    fn literal(i: &str) -> PResult<'_, Segment<'_>> {
        map(is_not("%"), Segment::Literal)(i)
    }

}

pub mod parser {
    //! Field Extractor and Task Parser.
    //!
    //! Every field is matched against the untouched original line and stripped from a working
    //! copy, in a fixed order:
    //! 1. completion marker `x`, then the completion date right after it;
    //! 2. priority `(A)`, which may follow the completion prefix;
    //! 3. creation date, which may follow any of the prefixes above;
    //! 4. `@contexts`, `+projects`, then `key:value` tags (`due` feeds the due date).
    //!
    //! Steps 1-3 only ever consume a prefix of the line; step 4 scans what follows that
    //! header. Whatever is left in the working copy becomes the description.

    use crate::config::{ConfigError, DateFormat};
    use crate::core::{DateField, Priority, Task};
    use chrono::NaiveDate;
    use once_cell::sync::Lazy;
    use regex::{Captures, Regex};
    use std::{collections::BTreeSet, str::FromStr};

    pub(crate) const LINE_TRIM: &[char] = &['\t', '\n', '\r', ' '];
    const DESCRIPTION_TRIM: &[char] = &['\t', '\n', '\r', '\x0c', ' '];

    static COMPLETED_RX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^x(?:\s|$)").expect("completed pattern"));
    static CONTEXT_RX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?:^|\s+)@(\S+)").expect("context pattern"));
    static PROJECT_RX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?:^|\s+)\+(\S+)").expect("project pattern"));
    static TAG_RX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?:^|\s+)([0-9A-Za-z_-]+):(\S+)").expect("tag pattern"));

    static DEFAULT_PARSER: Lazy<TaskParser> = Lazy::new(|| {
        TaskParser::new(DateFormat::default()).expect("default date format compiles")
    });

    #[derive(Debug, thiserror::Error)]
    pub enum ParseError {
        #[error("invalid {field} date {value:?}")]
        InvalidDate {
            field: DateField,
            value: String,
            #[source]
            source: chrono::ParseError,
        },
    }

    /* ------------------------ Public entry points ------------------------ */

    /// Parse one line with the default configuration.
    pub fn parse_task(line: &str) -> Result<Task, ParseError> {
        DEFAULT_PARSER.parse(line)
    }

    impl FromStr for Task {
        type Err = ParseError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            parse_task(s)
        }
    }

    /// Line parser bound to one date format. The date-dependent matchers are compiled once.
    #[derive(Debug, Clone)]
    pub struct TaskParser {
        date_format: DateFormat,
        completed_date: Regex,
        priority: Regex,
        created_date: Regex,
    }

    impl Default for TaskParser {
        fn default() -> Self {
            DEFAULT_PARSER.clone()
        }
    }

    impl TaskParser {
        pub fn new(date_format: DateFormat) -> Result<Self, ConfigError> {
            let date = date_format.pattern();
            let completed_date = Regex::new(&format!(r"^x\s*({date})\s+"))?;
            let priority = Regex::new(&format!(r"^(?:x\s+{date}|x|)\s*\(([A-Z])\)\s+"))?;
            let created_date = Regex::new(&format!(
                r"^(?:\([A-Z]\)|x\s+{date}\s+\([A-Z]\)|x\s+\([A-Z]\)|x\s+{date}|)\s*({date})\s+"
            ))?;

            Ok(Self {
                date_format,
                completed_date,
                priority,
                created_date,
            })
        }

        pub fn date_format(&self) -> &DateFormat {
            &self.date_format
        }

        /// Turn one line into a task. A malformed date anywhere fails the whole line.
        pub fn parse(&self, line: &str) -> Result<Task, ParseError> {
            let original = line.trim_matches(LINE_TRIM);
            let mut task = Task {
                original: original.to_string(),
                ..Task::default()
            };

            // Annotations are only looked for past the header, so header dates whose
            // format contains `:` never read as tags.
            let header_end = self.extract_header(original, &mut task)?;
            let body = &original[header_end..];
            let mut working = body.to_string();

            task.contexts = collect_tokens(&CONTEXT_RX, body);
            strip(&CONTEXT_RX, &mut working);

            task.projects = collect_tokens(&PROJECT_RX, body);
            strip(&PROJECT_RX, &mut working);

            for caps in TAG_RX.captures_iter(body) {
                let (key, value) = (&caps[1], &caps[2]);
                if key == "due" {
                    task.due_date = Some(self.parse_date(DateField::Due, value)?);
                } else {
                    task.additional_tags.insert(key.to_string(), value.to_string());
                }
            }
            strip(&TAG_RX, &mut working);

            task.description = working.trim_matches(DESCRIPTION_TRIM).to_string();
            Ok(task)
        }

        /// Completion, priority and created date. Returns the byte length of the prefix
        /// they occupy.
        fn extract_header(&self, original: &str, task: &mut Task) -> Result<usize, ParseError> {
            let mut header_end = 0;

            if let Some(m) = COMPLETED_RX.find(original) {
                task.completed = true;
                header_end = m.end();

                if let Some(caps) = self.completed_date.captures(original) {
                    task.completed_date = Some(self.parse_date(DateField::Completed, &caps[1])?);
                    header_end = header_end.max(match_end(&caps));
                }
            }

            if let Some(caps) = self.priority.captures(original) {
                task.priority = caps[1].chars().next().and_then(Priority::new);
                header_end = header_end.max(match_end(&caps));
            }

            if let Some(caps) = self.created_date.captures(original) {
                task.created_date = Some(self.parse_date(DateField::Created, &caps[1])?);
                header_end = header_end.max(match_end(&caps));
            }

            Ok(header_end)
        }

        fn parse_date(&self, field: DateField, value: &str) -> Result<NaiveDate, ParseError> {
            self.date_format
                .parse(value)
                .map_err(|source| ParseError::InvalidDate {
                    field,
                    value: value.to_string(),
                    source,
                })
        }
    }

    /* ------------------------------- Utils ------------------------------- */

    fn match_end(caps: &Captures<'_>) -> usize {
        caps.get(0).map_or(0, |m| m.end())
    }

    fn collect_tokens(rx: &Regex, original: &str) -> BTreeSet<String> {
        rx.captures_iter(original)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    fn strip(rx: &Regex, working: &mut String) {
        let stripped = rx.replace_all(working.as_str(), "").into_owned();
        *working = stripped;
    }

}

pub mod format {
    //! Task Serializer: canonical todo.txt rendering.

    use crate::config::DateFormat;
    use crate::core::Task;
    use std::fmt;

    /// Render one task in canonical order:
    /// `x [completed] (P) [created] description @contexts +projects key:value due:date`.
    /// Contexts, projects and tags come out sorted; `due:` is always the last token.
    pub fn render_task(task: &Task, dates: &DateFormat) -> String {
        let mut line = String::new();

        if task.completed {
            push_part(&mut line, "x");
            if let Some(date) = task.effective_completed_date() {
                push_part(&mut line, &dates.render(date));
            }
        }

        if let Some(priority) = task.priority {
            push_part(&mut line, &format!("({priority})"));
        }

        if let Some(date) = task.created_date {
            push_part(&mut line, &dates.render(date));
        }

        if !task.description.is_empty() {
            push_part(&mut line, &task.description);
        }

        for context in &task.contexts {
            push_part(&mut line, &format!("@{context}"));
        }

        for project in &task.projects {
            push_part(&mut line, &format!("+{project}"));
        }

        for (key, value) in &task.additional_tags {
            push_part(&mut line, &format!("{key}:{value}"));
        }

        if let Some(due) = task.due_date {
            push_part(&mut line, &format!("due:{}", dates.render(due)));
        }

        line
    }

    fn push_part(line: &mut String, part: &str) {
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(part);
    }

    /// One rendered line per task, each terminated by `\n`.
    pub fn render_tasks<'a>(
        tasks: impl IntoIterator<Item = &'a Task>,
        dates: &DateFormat,
    ) -> String {
        let mut out = String::new();
        for task in tasks {
            out.push_str(&render_task(task, dates));
            out.push('\n');
        }
        out
    }

    impl fmt::Display for Task {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&render_task(self, &DateFormat::default()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::Priority;
        use crate::parser::parse_task;
        use chrono::NaiveDate;

        fn date(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
        }

        #[test]
        fn renders_canonical_field_order() {
            let task = parse_task(
                "x (C) 2014-01-01 @Go due:2014-01-12 Create golang library documentation +go-todotxt   ",
            )
            .expect("parse");
            assert_eq!(
                task.to_string(),
                "x (C) 2014-01-01 Create golang library documentation @Go +go-todotxt due:2014-01-12"
            );
        }

        #[test]
        fn renders_tasks_built_in_code() {
            let mut task = Task {
                description: "Call Dad".into(),
                priority: Priority::new('A'),
                created_date: Some(date(2013, 7, 23)),
                due_date: Some(date(2013, 7, 31)),
                ..Task::default()
            };
            task.contexts.insert("Phone".into());
            task.contexts.insert("Home".into());
            task.projects.insert("Family".into());
            task.additional_tags.insert("customTag1".into(), "Important!".into());

            assert_eq!(
                task.to_string(),
                "(A) 2013-07-23 Call Dad @Home @Phone +Family customTag1:Important! due:2013-07-31"
            );
        }

        #[test]
        fn completion_date_hidden_when_not_completed() {
            let task = Task {
                description: "Reopened".into(),
                completed_date: Some(date(2014, 1, 3)),
                ..Task::default()
            };
            assert_eq!(task.to_string(), "Reopened");

            let mut task = task;
            task.completed = true;
            assert_eq!(task.to_string(), "x 2014-01-03 Reopened");
        }

        #[test]
        fn empty_description_leaves_no_double_spaces() {
            let task = parse_task("(A) @Home due:2014-01-05").expect("parse");
            assert_eq!(task.to_string(), "(A) @Home due:2014-01-05");
            assert_eq!(Task::default().to_string(), "");
        }

        #[test]
        fn rendering_reaches_a_fixed_point_after_one_pass() {
            for line in crate::fixtures::SAMPLE.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let first = parse_task(line).expect("parse sample").to_string();
                let second = parse_task(&first).expect("reparse").to_string();
                assert_eq!(first, second, "{line:?} is not a fixed point");
            }
        }

        #[test]
        fn renders_with_custom_date_format() {
            let dates = DateFormat::new("%d/%m/%Y").expect("format");
            let task = Task {
                description: "Renew passport".into(),
                created_date: Some(date(2014, 1, 2)),
                due_date: Some(date(2014, 3, 1)),
                ..Task::default()
            };
            assert_eq!(
                render_task(&task, &dates),
                "02/01/2014 Renew passport due:01/03/2014"
            );
            assert_eq!(
                render_tasks([&task, &task], &dates),
                "02/01/2014 Renew passport due:01/03/2014\n02/01/2014 Renew passport due:01/03/2014\n"
            );
        }
    }
}

pub mod list {
    //! Task List: ordered collection with identity, lookup, removal and filtering.

    use crate::config::{Config, ConfigError};
    use crate::core::{Task, TaskId};
    use crate::format::{render_task, render_tasks};
    use crate::parser::{LINE_TRIM, ParseError, TaskParser};
    use std::{fmt, io};
    use tracing::{debug, trace};

    #[derive(Debug, thiserror::Error)]
    pub enum TodoError {
        #[error("failed to parse line {line}")]
        Parse {
            line: usize,
            #[source]
            source: ParseError,
        },
        #[error("task {0} not found")]
        NotFound(TaskId),
        #[error("no task matching {0:?}")]
        NoMatchingTask(String),
        #[error("unrecognized sort option {0:?}")]
        UnrecognizedSortOption(String),
        #[error(transparent)]
        Config(#[from] ConfigError),
        #[error(transparent)]
        Io(#[from] io::Error),
    }

    /// Ordered todo.txt tasks. Ids, not positions, are the stable handle.
    #[derive(Debug, Clone, Default)]
    pub struct TaskList {
        config: Config,
        parser: TaskParser,
        pub(crate) tasks: Vec<Task>,
    }

    impl TaskList {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_config(config: Config) -> Result<Self, ConfigError> {
            let parser = TaskParser::new(config.date_format.clone())?;
            Ok(Self {
                config,
                parser,
                tasks: Vec::new(),
            })
        }

        pub fn config(&self) -> &Config {
            &self.config
        }

        /// Parse a single line with this list's date format, without adding it.
        pub fn parse_task(&self, line: &str) -> Result<Task, ParseError> {
            self.parser.parse(line)
        }

        /* ------------------------------ Loading ------------------------------ */

        /// Replace the contents with the tasks in `text`. See [`TaskList::load_lines`].
        pub fn load_str(&mut self, text: &str) -> Result<(), TodoError> {
            self.load_lines(text.lines())
        }

        /// Replace the contents with one task per non-blank, non-comment line. Ids are
        /// 1-based among the kept lines. On error the list keeps its previous contents.
        pub fn load_lines<I, S>(&mut self, lines: I) -> Result<(), TodoError>
        where
            I: IntoIterator<Item = S>,
            S: AsRef<str>,
        {
            self.load_results(lines.into_iter().map(Ok))
        }

        pub(crate) fn load_results<I, S>(&mut self, lines: I) -> Result<(), TodoError>
        where
            I: Iterator<Item = Result<S, io::Error>>,
            S: AsRef<str>,
        {
            let mut tasks = Vec::new();
            for (index, line) in lines.enumerate() {
                let line = line?;
                let text = line.as_ref().trim_matches(LINE_TRIM);
                if text.is_empty() || (self.config.ignore_comment_lines && text.starts_with('#'))
                {
                    trace!(line = index + 1, "skipping blank or comment line");
                    continue;
                }

                let mut task = self
                    .parser
                    .parse(text)
                    .map_err(|source| TodoError::Parse {
                        line: index + 1,
                        source,
                    })?;
                task.id = TaskId(tasks.len() as u32 + 1);
                tasks.push(task);
            }

            debug!(count = tasks.len(), "loaded task list");
            self.tasks = tasks;
            Ok(())
        }

        /* ---------------------------- Serializing ---------------------------- */

        /// Every task rendered canonically, one per line, with a trailing newline.
        pub fn serialize(&self) -> String {
            render_tasks(&self.tasks, &self.config.date_format)
        }

        /// Render one task with this list's date format.
        pub fn render(&self, task: &Task) -> String {
            render_task(task, &self.config.date_format)
        }

        /* ------------------------------ Editing ------------------------------ */

        /// Append `task` under the next free id (max existing + 1), overriding any id it had.
        pub fn add(&mut self, mut task: Task) -> TaskId {
            let id = self
                .tasks
                .iter()
                .map(|t| t.id)
                .max()
                .unwrap_or_default()
                .next();
            task.id = id;
            self.tasks.push(task);
            id
        }

        pub fn get(&self, id: TaskId) -> Result<&Task, TodoError> {
            self.tasks
                .iter()
                .find(|t| t.id == id)
                .ok_or(TodoError::NotFound(id))
        }

        /// Mutable handle for in-place edits of a task.
        pub fn get_mut(&mut self, id: TaskId) -> Result<&mut Task, TodoError> {
            self.tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(TodoError::NotFound(id))
        }

        pub fn remove_by_id(&mut self, id: TaskId) -> Result<(), TodoError> {
            let before = self.tasks.len();
            self.tasks.retain(|t| t.id != id);
            if self.tasks.len() == before {
                return Err(TodoError::NotFound(id));
            }
            debug!(%id, "removed task");
            Ok(())
        }

        /// Remove every task whose canonical rendering equals `task`'s.
        /// Returns how many were removed.
        pub fn remove_matching(&mut self, task: &Task) -> Result<usize, TodoError> {
            let target = self.render(task);
            let dates = &self.config.date_format;
            let before = self.tasks.len();
            self.tasks.retain(|t| render_task(t, dates) != target);

            let removed = before - self.tasks.len();
            if removed == 0 {
                return Err(TodoError::NoMatchingTask(target));
            }
            debug!(removed, "removed matching tasks");
            Ok(removed)
        }

        /// New list holding the tasks that satisfy `predicate`, in their current order.
        pub fn filter<P>(&self, mut predicate: P) -> TaskList
        where
            P: FnMut(&Task) -> bool,
        {
            TaskList {
                config: self.config.clone(),
                parser: self.parser.clone(),
                tasks: self
                    .tasks
                    .iter()
                    .filter(|t| predicate(*t))
                    .cloned()
                    .collect(),
            }
        }

        /* ------------------------------ Access ------------------------------ */

        pub fn tasks(&self) -> &[Task] {
            &self.tasks
        }

        pub fn iter(&self) -> std::slice::Iter<'_, Task> {
            self.tasks.iter()
        }

        pub fn len(&self) -> usize {
            self.tasks.len()
        }

        pub fn is_empty(&self) -> bool {
            self.tasks.is_empty()
        }
    }

    impl<'a> IntoIterator for &'a TaskList {
        type Item = &'a Task;
        type IntoIter = std::slice::Iter<'a, Task>;

        fn into_iter(self) -> Self::IntoIter {
            self.tasks.iter()
        }
    }

    impl fmt::Display for TaskList {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.serialize())
        }
    }

}

pub mod sort {
    //! Sort Engine. Tasks carrying the sort field always come first, in both directions;
    //! only the order among them flips. The sort is stable.

    use crate::core::Task;
    use crate::list::{TaskList, TodoError};
    use serde::{Deserialize, Serialize};
    use std::{cmp::Ordering, fmt, str::FromStr};
    use tracing::debug;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum SortField {
        Priority,
        CreatedDate,
        CompletedDate,
        DueDate,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum SortOrder {
        #[default]
        Ascending,
        Descending,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SortKey {
        pub field: SortField,
        pub order: SortOrder,
    }

    impl SortKey {
        pub const fn new(field: SortField, order: SortOrder) -> Self {
            Self { field, order }
        }

        pub const fn ascending(field: SortField) -> Self {
            Self::new(field, SortOrder::Ascending)
        }

        pub const fn descending(field: SortField) -> Self {
            Self::new(field, SortOrder::Descending)
        }
    }

    /// Total order for `key`: present values before missing ones, then by value in the
    /// requested direction.
    pub fn compare_tasks(a: &Task, b: &Task, key: SortKey) -> Ordering {
        match key.field {
            SortField::Priority => compare_present(a.priority, b.priority, key.order),
            SortField::CreatedDate => compare_present(a.created_date, b.created_date, key.order),
            SortField::CompletedDate => compare_present(
                a.effective_completed_date(),
                b.effective_completed_date(),
                key.order,
            ),
            SortField::DueDate => compare_present(a.due_date, b.due_date, key.order),
        }
    }

    fn compare_present<T: Ord>(a: Option<T>, b: Option<T>, order: SortOrder) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => match order {
                SortOrder::Ascending => a.cmp(&b),
                SortOrder::Descending => b.cmp(&a),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    impl TaskList {
        pub fn sort(&mut self, key: SortKey) {
            self.tasks.sort_by(|a, b| compare_tasks(a, b, key));
            debug!(%key, count = self.tasks.len(), "sorted task list");
        }

        /// Sort by a textual selector such as `priority-desc` or `SORT_DUE_DATE_ASC`.
        /// An unrecognized selector leaves the list untouched.
        pub fn sort_by_option(&mut self, option: &str) -> Result<(), TodoError> {
            let key: SortKey = option.parse()?;
            self.sort(key);
            Ok(())
        }
    }

    /* ------------------------------ Selectors ------------------------------ */

    impl FromStr for SortKey {
        type Err = TodoError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
            let normalized = normalized.strip_prefix("sort-").unwrap_or(&normalized);

            let (field, order) = match normalized.rsplit_once('-') {
                Some((field, "asc")) => (field, SortOrder::Ascending),
                Some((field, "desc")) => (field, SortOrder::Descending),
                _ => (normalized, SortOrder::Ascending),
            };

            let field = match field {
                "priority" => SortField::Priority,
                "created" | "created-date" => SortField::CreatedDate,
                "completed" | "completed-date" => SortField::CompletedDate,
                "due" | "due-date" => SortField::DueDate,
                _ => return Err(TodoError::UnrecognizedSortOption(s.to_string())),
            };
            Ok(Self::new(field, order))
        }
    }

    impl fmt::Display for SortField {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                SortField::Priority => "priority",
                SortField::CreatedDate => "created-date",
                SortField::CompletedDate => "completed-date",
                SortField::DueDate => "due-date",
            })
        }
    }

    impl fmt::Display for SortOrder {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                SortOrder::Ascending => "asc",
                SortOrder::Descending => "desc",
            })
        }
    }

    impl fmt::Display for SortKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}-{}", self.field, self.order)
        }
    }

}

pub mod storage {
    //! Readers, writers and files around `TaskList`. The core only sees lines and strings;
    //! this is where bytes come from and go to.

    use crate::config::Config;
    use crate::list::{TaskList, TodoError};
    use std::{
        fs::{self, File},
        io::{BufRead, BufReader, Write},
        path::{Path, PathBuf},
    };
    use tracing::debug;

    /// Where a task list is persisted.
    pub trait TaskRepository {
        fn load(&self) -> Result<TaskList, TodoError>;
        fn save(&self, list: &TaskList) -> Result<(), TodoError>;
    }

    /// A todo.txt file on disk.
    #[derive(Debug, Clone)]
    pub struct FileRepository {
        path: PathBuf,
        config: Config,
    }

    impl FileRepository {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self::with_config(path, Config::default())
        }

        pub fn with_config(path: impl Into<PathBuf>, config: Config) -> Self {
            Self {
                path: path.into(),
                config,
            }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl TaskRepository for FileRepository {
        fn load(&self) -> Result<TaskList, TodoError> {
            let mut list = TaskList::with_config(self.config.clone())?;
            list.load_from_path(&self.path)?;
            Ok(list)
        }

        fn save(&self, list: &TaskList) -> Result<(), TodoError> {
            list.write_to_path(&self.path)
        }
    }

    impl TaskList {
        /// Replace the contents with the lines read from `reader` (stdin works too).
        pub fn load_from_reader<R: BufRead>(&mut self, reader: R) -> Result<(), TodoError> {
            self.load_results(reader.lines())
        }

        pub fn load_from_path(&mut self, path: impl AsRef<Path>) -> Result<(), TodoError> {
            let path = path.as_ref();
            debug!(path = %path.display(), "loading todo.txt");
            let file = File::open(path)?;
            self.load_from_reader(BufReader::new(file))
        }

        pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), TodoError> {
            writer.write_all(self.serialize().as_bytes())?;
            writer.flush()?;
            Ok(())
        }

        pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<(), TodoError> {
            let path = path.as_ref();
            debug!(path = %path.display(), count = self.len(), "writing todo.txt");
            fs::write(path, self.serialize())?;
            Ok(())
        }
    }

    /// Load a todo.txt file with the default configuration.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<TaskList, TodoError> {
        let mut list = TaskList::new();
        list.load_from_path(path)?;
        Ok(list)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::config::DateFormat;
        use crate::core::TaskId;
        use crate::fixtures::{SAMPLE, SAMPLE_CANONICAL};
        use std::io::{self, Cursor};

        #[test]
        fn file_round_trip_canonicalizes() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("todo.txt");
            fs::write(&path, SAMPLE).expect("write sample");

            let list = load_from_path(&path).expect("load");
            assert_eq!(list.len(), 9);
            list.write_to_path(&path).expect("write back");
            assert_eq!(fs::read_to_string(&path).expect("read"), SAMPLE_CANONICAL);
        }

        #[test]
        fn reader_accepts_crlf_lines() {
            let mut list = TaskList::new();
            list.load_from_reader(Cursor::new("(A) Call Mom @Phone\r\n\r\nx Pay rent\r\n"))
                .expect("load");
            assert_eq!(list.serialize(), "(A) Call Mom @Phone\nx Pay rent\n");
            assert_eq!(list.tasks()[1].id, TaskId(2));
        }

        #[test]
        fn write_to_emits_serialized_text() {
            let mut list = TaskList::new();
            list.load_str(SAMPLE).expect("load");
            let mut out = Vec::new();
            list.write_to(&mut out).expect("write");
            assert_eq!(String::from_utf8(out).expect("utf8"), SAMPLE_CANONICAL);
        }

        #[test]
        fn missing_file_surfaces_io_error() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let err = load_from_path(tmp.path().join("absent.txt")).expect_err("missing");
            match err {
                TodoError::Io(source) => assert_eq!(source.kind(), io::ErrorKind::NotFound),
                other => panic!("unexpected error {other:?}"),
            }
        }

        #[test]
        fn repository_uses_its_config() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("todo.txt");
            fs::write(&path, "# kept\n(B) 01/02/2014 Renew passport\n").expect("write");

            let config = Config {
                date_format: DateFormat::new("%d/%m/%Y").expect("format"),
                ignore_comment_lines: false,
            };
            let repo = FileRepository::with_config(&path, config);
            let mut list = repo.load().expect("load");
            assert_eq!(list.len(), 2);
            assert_eq!(
                list.tasks()[1].created_date,
                chrono::NaiveDate::from_ymd_opt(2014, 2, 1)
            );

            list.remove_by_id(TaskId(1)).expect("drop comment task");
            repo.save(&list).expect("save");
            assert_eq!(
                fs::read_to_string(repo.path()).expect("read"),
                "(B) 01/02/2014 Renew passport\n"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Messy input: comments, blank lines, annotations out of canonical order.
    pub const SAMPLE: &str = "# sample todo.txt
2013-02-22 Pick up milk @GroceryStore
x Download Todo.txt mobile app @Phone

(B) 2013-12-01 Outline chapter 5 +Novel @Computer due:2014-02-17 Level:5 private:false
x 2014-01-02 (B) 2013-12-30 Create golang library test cases @Go +go-todotxt
x 2014-01-03 2014-01-01 Create some more golang library test cases @Go +go-todotxt
(A) 2012-01-30 @Phone Call Mom @Call +Family
(C) Add cover sheets @Office +TPSReports Importance:Very!
Plan backyard herb garden @Home +Gardening +Planning +Improving
   x (C) 2014-01-01 @Go due:2014-01-12 Create golang library documentation +go-todotxt
";

    pub const SAMPLE_CANONICAL: &str = "2013-02-22 Pick up milk @GroceryStore
x Download Todo.txt mobile app @Phone
(B) 2013-12-01 Outline chapter 5 @Computer +Novel Level:5 private:false due:2014-02-17
x 2014-01-02 (B) 2013-12-30 Create golang library test cases @Go +go-todotxt
x 2014-01-03 2014-01-01 Create some more golang library test cases @Go +go-todotxt
(A) 2012-01-30 Call Mom @Call @Phone +Family
(C) Add cover sheets @Office +TPSReports Importance:Very!
Plan backyard herb garden @Home +Gardening +Improving +Planning
x (C) 2014-01-01 Create golang library documentation @Go +go-todotxt due:2014-01-12
";
}

pub use crate::config::{Config, ConfigError, DateFormat};
pub use crate::core::{DateField, Priority, Task, TaskId};
pub use crate::format::{render_task, render_tasks};
pub use crate::list::{TaskList, TodoError};
pub use crate::parser::{ParseError, TaskParser, parse_task};
pub use crate::sort::{SortField, SortKey, SortOrder, compare_tasks};
pub use crate::storage::{FileRepository, TaskRepository};
