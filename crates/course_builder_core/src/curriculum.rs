//! crates/course_builder_core/src/curriculum.rs
//!
//! Lookup, traversal and copy-on-write update operations over the curriculum tree.
//!
//! Document order is modules in sequence, then lessons within a module in
//! sequence. Modules without lessons are tolerated everywhere and simply
//! contribute nothing to the linear ordering.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::domain::{FlatLesson, Lesson, LessonCoord, LessonRequest, Module, Outline};

/// A structural defect that makes a generated outline unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutlineDefect {
    #[error("outline has no title")]
    MissingTitle,
    #[error("outline contains no lessons")]
    NoLessons,
    #[error("module {0} has an empty id")]
    EmptyModuleId(usize),
    #[error("lesson at {0} has an empty id")]
    EmptyLessonId(LessonCoord),
    #[error("id '{0}' is used more than once")]
    DuplicateId(String),
    #[error("lesson at {0} has a zero time estimate")]
    ZeroEstimate(LessonCoord),
}

impl Outline {
    pub fn module(&self, module_index: usize) -> Option<&Arc<Module>> {
        self.modules.get(module_index)
    }

    /// Bounds-checked read of a single lesson.
    pub fn lookup(&self, coord: LessonCoord) -> Option<&Arc<Lesson>> {
        self.module(coord.module_index)?
            .lessons
            .get(coord.lesson_index)
    }

    pub fn contains(&self, coord: LessonCoord) -> bool {
        self.lookup(coord).is_some()
    }

    /// Returns a new outline whose lesson at `coord` carries `content`.
    ///
    /// Every other module and lesson is shared with `self`. `None` when the
    /// coordinate does not exist.
    pub fn with_lesson_content(
        &self,
        coord: LessonCoord,
        content: impl Into<String>,
    ) -> Option<Outline> {
        let content = content.into();
        self.update_lesson(coord, move |lesson| lesson.content = Some(content))
    }

    /// Same structural update as `with_lesson_content`, for the completion flag.
    pub fn with_lesson_completed(&self, coord: LessonCoord) -> Option<Outline> {
        self.update_lesson(coord, |lesson| lesson.completed = true)
    }

    fn update_lesson(
        &self,
        coord: LessonCoord,
        update: impl FnOnce(&mut Lesson),
    ) -> Option<Outline> {
        let module = self.module(coord.module_index)?;
        let mut lesson = Lesson::clone(module.lessons.get(coord.lesson_index)?);
        update(&mut lesson);

        let mut lessons = module.lessons.clone();
        lessons[coord.lesson_index] = Arc::new(lesson);

        let mut modules = self.modules.clone();
        modules[coord.module_index] = Arc::new(Module {
            id: module.id.clone(),
            title: module.title.clone(),
            description: module.description.clone(),
            lessons,
        });

        Some(Outline {
            title: self.title.clone(),
            description: self.description.clone(),
            modules,
        })
    }

    /// Linearizes the tree into document order.
    pub fn flatten(&self) -> Vec<FlatLesson> {
        self.modules
            .iter()
            .enumerate()
            .flat_map(|(module_index, module)| {
                module
                    .lessons
                    .iter()
                    .enumerate()
                    .map(move |(lesson_index, lesson)| FlatLesson {
                        coord: LessonCoord::new(module_index, lesson_index),
                        lesson: lesson.clone(),
                        module: module.clone(),
                    })
            })
            .collect()
    }

    pub fn first_coord(&self) -> Option<LessonCoord> {
        self.modules
            .iter()
            .position(|m| !m.lessons.is_empty())
            .map(|module_index| LessonCoord::new(module_index, 0))
    }

    pub fn last_coord(&self) -> Option<LessonCoord> {
        self.modules
            .iter()
            .rposition(|m| !m.lessons.is_empty())
            .map(|module_index| {
                LessonCoord::new(module_index, self.modules[module_index].lessons.len() - 1)
            })
    }

    pub fn is_first(&self, coord: LessonCoord) -> bool {
        self.contains(coord) && self.first_coord() == Some(coord)
    }

    pub fn is_last(&self, coord: LessonCoord) -> bool {
        self.contains(coord) && self.last_coord() == Some(coord)
    }

    /// The coordinate following `coord` in document order.
    pub fn next_coord(&self, coord: LessonCoord) -> Option<LessonCoord> {
        let module = self.module(coord.module_index)?;
        if coord.lesson_index + 1 < module.lessons.len() {
            return Some(LessonCoord::new(coord.module_index, coord.lesson_index + 1));
        }
        self.modules
            .iter()
            .enumerate()
            .skip(coord.module_index + 1)
            .find(|(_, m)| !m.lessons.is_empty())
            .map(|(module_index, _)| LessonCoord::new(module_index, 0))
    }

    /// The coordinate preceding `coord` in document order.
    pub fn prev_coord(&self, coord: LessonCoord) -> Option<LessonCoord> {
        self.module(coord.module_index)?;
        if coord.lesson_index > 0 {
            return Some(LessonCoord::new(coord.module_index, coord.lesson_index - 1));
        }
        self.modules[..coord.module_index]
            .iter()
            .rposition(|m| !m.lessons.is_empty())
            .map(|module_index| {
                LessonCoord::new(module_index, self.modules[module_index].lessons.len() - 1)
            })
    }

    pub fn coord_of(&self, lesson_id: &str) -> Option<LessonCoord> {
        self.flatten()
            .into_iter()
            .find(|entry| entry.lesson.id == lesson_id)
            .map(|entry| entry.coord)
    }

    /// 1-based position of `coord` in the flattened order.
    pub fn step_number(&self, coord: LessonCoord) -> Option<usize> {
        if !self.contains(coord) {
            return None;
        }
        let before: usize = self.modules[..coord.module_index]
            .iter()
            .map(|m| m.lessons.len())
            .sum();
        Some(before + coord.lesson_index + 1)
    }

    pub fn total_lessons(&self) -> usize {
        self.modules.iter().map(|m| m.lessons.len()).sum()
    }

    pub fn total_minutes(&self) -> u64 {
        self.modules
            .iter()
            .flat_map(|m| m.lessons.iter())
            .map(|l| u64::from(l.estimated_minutes))
            .sum()
    }

    /// Ids of lessons whose persisted completion flag is set.
    pub fn completed_ids(&self) -> BTreeSet<String> {
        self.modules
            .iter()
            .flat_map(|m| m.lessons.iter())
            .filter(|l| l.completed)
            .map(|l| l.id.clone())
            .collect()
    }

    /// Percentage of this outline's lessons found in `completed`.
    pub fn progress(&self, completed: &BTreeSet<String>) -> f64 {
        let total = self.total_lessons();
        if total == 0 {
            return 0.0;
        }
        let done = self
            .modules
            .iter()
            .flat_map(|m| m.lessons.iter())
            .filter(|l| completed.contains(&l.id))
            .count();
        done as f64 / total as f64 * 100.0
    }

    pub fn lesson_request(&self, topic: &str, coord: LessonCoord) -> Option<LessonRequest> {
        let module = self.module(coord.module_index)?;
        let lesson = module.lessons.get(coord.lesson_index)?;
        Some(LessonRequest {
            topic: topic.to_string(),
            module_title: module.title.clone(),
            lesson_title: lesson.title.clone(),
            lesson_id: lesson.id.clone(),
        })
    }

    /// Checks that a generated outline can be navigated and persisted.
    pub fn validate(&self) -> Result<(), OutlineDefect> {
        if self.title.trim().is_empty() {
            return Err(OutlineDefect::MissingTitle);
        }
        if self.total_lessons() == 0 {
            return Err(OutlineDefect::NoLessons);
        }

        let mut seen = HashSet::new();
        for (module_index, module) in self.modules.iter().enumerate() {
            if module.id.trim().is_empty() {
                return Err(OutlineDefect::EmptyModuleId(module_index));
            }
            if !seen.insert(module.id.as_str()) {
                return Err(OutlineDefect::DuplicateId(module.id.clone()));
            }
            for (lesson_index, lesson) in module.lessons.iter().enumerate() {
                let coord = LessonCoord::new(module_index, lesson_index);
                if lesson.id.trim().is_empty() {
                    return Err(OutlineDefect::EmptyLessonId(coord));
                }
                if !seen.insert(lesson.id.as_str()) {
                    return Err(OutlineDefect::DuplicateId(lesson.id.clone()));
                }
                if lesson.estimated_minutes == 0 {
                    return Err(OutlineDefect::ZeroEstimate(coord));
                }
            }
        }
        Ok(())
    }
}
