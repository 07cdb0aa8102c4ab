use leptos::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::core::history::{HistoryEntry, HistoryLog, HistoryStore};
use crate::core::io::{Storage, WebStorage};
use crate::core::state::{
    ExplanationFormat, GeneratedContent, GenerationOutput, LearningRequest, APP_TITLE,
    MAX_AGE_LEVEL, MAX_HISTORY_ITEMS, MIN_AGE_LEVEL,
};
use crate::services::generation::Explainer;
use crate::services::llm::ProxyClient;
use crate::services::quiz::QuizSession;
use crate::services::speech::web::WebSpeech;
use crate::services::speech::{QueueStatus, SpeechController, Voice};

const VOICE_SAMPLE: &str = "Hello! This is how I sound when I read to you.";
const SPEECH_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Read-aloud state shared by the components. Every field is an arena
/// handle, so the whole thing is `Copy`.
#[derive(Clone, Copy)]
struct ReadAloud {
    controller: StoredValue<Option<Rc<RefCell<SpeechController<WebSpeech>>>>>,
    status: RwSignal<QueueStatus>,
    error: RwSignal<Option<String>>,
    /// Failures of the voice settings' test button.
    sample_error: RwSignal<Option<String>>,
    voices: RwSignal<Vec<Voice>>,
    selected_voice: RwSignal<Option<String>>,
}

impl ReadAloud {
    fn new() -> Self {
        let controller = match WebSpeech::new() {
            Ok(platform) => Some(Rc::new(RefCell::new(SpeechController::new(platform)))),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        };
        let this = Self {
            controller: store_value(controller),
            status: create_rw_signal(QueueStatus::Idle),
            error: create_rw_signal(None),
            sample_error: create_rw_signal(None),
            voices: create_rw_signal(Vec::new()),
            selected_voice: create_rw_signal(None),
        };
        this.with_controller(|c| {
            c.platform_mut()
                .on_voices_changed(move || this.reload_voices())
        });
        this.reload_voices();
        this
    }

    fn is_supported(&self) -> bool {
        self.controller.with_value(|c| c.is_some())
    }

    /// Runs `f` against the controller. `false` if speech is unsupported or
    /// the controller is already borrowed.
    fn with_controller(&self, f: impl FnOnce(&mut SpeechController<WebSpeech>)) -> bool {
        self.controller.with_value(|c| match c {
            Some(c) => match c.try_borrow_mut() {
                Ok(mut controller) => {
                    f(&mut controller);
                    true
                }
                Err(_) => false,
            },
            None => false,
        })
    }

    fn refresh_status(&self) {
        let mut status = QueueStatus::Idle;
        self.with_controller(|c| status = c.status());
        if self.status.get_untracked() != status {
            self.status.set(status);
        }
    }

    fn reload_voices(&self) {
        let mut list = Vec::new();
        self.with_controller(|c| {
            c.notify_voices_changed();
            list = c.voices().to_vec();
        });
        self.voices.set(list);
    }

    fn poll(&self) {
        self.with_controller(|c| c.process_events());
        self.refresh_status();
    }

    fn speak(&self, text: &str, language: &str) {
        self.speak_reporting(text, language, self.error);
    }

    /// Reads a sample in `language` with the automatic voice choice.
    fn sample(&self, language: &str) {
        self.speak_reporting(VOICE_SAMPLE, language, self.sample_error);
    }

    fn speak_reporting(&self, text: &str, language: &str, error: RwSignal<Option<String>>) {
        error.set(None);
        let voice = self.selected_voice.get_untracked();
        let started = self.with_controller(|c| {
            c.speak(
                text,
                language,
                Box::new(|| log::debug!("Read aloud finished")),
                Box::new(move |e| error.set(Some(e.to_string()))),
                voice.as_deref(),
            )
        });
        if !started {
            error.set(Some(
                "Sorry, your browser doesn't support text-to-speech.".to_string(),
            ));
        }
        self.refresh_status();
    }

    fn test(&self, voice_uri: &str, language: &str) {
        let error = self.sample_error;
        error.set(None);
        self.with_controller(|c| {
            c.test(
                voice_uri,
                VOICE_SAMPLE,
                language,
                Box::new(move |e| error.set(Some(e.to_string()))),
            )
        });
        self.refresh_status();
    }

    fn pause(&self) {
        self.with_controller(|c| c.pause());
        self.refresh_status();
    }

    fn resume(&self) {
        self.with_controller(|c| c.resume());
        self.refresh_status();
    }

    fn stop(&self) {
        self.with_controller(|c| c.stop());
        self.refresh_status();
    }
}

fn proxy_origin() -> String {
    web_sys::window()
        .and_then(|w| w.location().origin().ok())
        .unwrap_or_default()
}

#[component]
pub fn App() -> impl IntoView {
    let store = match WebStorage::new() {
        Ok(s) => Some(HistoryStore::new(
            Arc::new(s) as Arc<dyn Storage>,
            MAX_HISTORY_ITEMS,
        )),
        Err(e) => {
            log::error!("History unavailable: {}", e);
            None
        }
    };
    let store = store_value(store);
    let explainer = store_value(Rc::new(Explainer::new(Box::new(ProxyClient::new(
        &proxy_origin(),
    )))));

    let defaults = LearningRequest::default();
    let topic = create_rw_signal(defaults.topic.clone());
    let age_level = create_rw_signal(defaults.age_level);
    let format = create_rw_signal(defaults.format);
    let language = create_rw_signal(defaults.language.clone());
    let read_aloud = create_rw_signal(defaults.read_aloud);

    let loading = create_rw_signal(false);
    let error = create_rw_signal(None::<String>);
    let output = create_rw_signal(None::<(LearningRequest, GenerationOutput)>);
    let quiz = create_rw_signal(None::<QuizSession>);
    let history = create_rw_signal(HistoryLog::default());

    let speech = ReadAloud::new();

    // Restore history and the saved voice.
    spawn_local(async move {
        let Some(store) = store.get_value() else {
            return;
        };
        match store.load().await {
            Ok(log) => history.set(log),
            Err(e) => log::error!("Failed to load history: {}", e),
        }
        match store.load_selected_voice().await {
            Ok(voice) => speech.selected_voice.set(voice),
            Err(e) => log::error!("Failed to load selected voice: {}", e),
        }
    });

    if let Ok(handle) = set_interval_with_handle(move || speech.poll(), SPEECH_POLL_INTERVAL) {
        on_cleanup(move || handle.clear());
    }

    let show = move |request: LearningRequest, generated: GenerationOutput| {
        speech.stop();
        quiz.set(match &generated.content {
            GeneratedContent::Quiz(questions) => Some(QuizSession::new(questions.clone())),
            GeneratedContent::Text(_) => None,
        });
        if let (GeneratedContent::Text(text), true) = (&generated.content, request.read_aloud) {
            speech.speak(text, &request.language);
        }
        output.set(Some((request, generated)));
    };

    let generate = move |request: LearningRequest| {
        if loading.get_untracked() {
            return;
        }
        if let Err(e) = request.validate() {
            error.set(Some(e.to_string()));
            return;
        }
        speech.stop();
        loading.set(true);
        error.set(None);
        output.set(None);
        quiz.set(None);

        let explainer = explainer.get_value();
        spawn_local(async move {
            match explainer.generate(&request).await {
                Ok(generated) => {
                    history.update(|log| log.record(HistoryEntry::new(&request, &generated)));
                    if let Some(store) = store.get_value() {
                        if let Err(e) = store.save(&history.get_untracked()).await {
                            log::error!("Failed to save history: {}", e);
                        }
                    }
                    show(request, generated);
                }
                Err(e) => {
                    log::error!("Error generating content: {}", e);
                    error.set(Some(e.to_string()));
                }
            }
            loading.set(false);
        });
    };

    let current_request = move || LearningRequest {
        topic: topic.get_untracked().trim().to_string(),
        age_level: age_level.get_untracked(),
        format: format.get_untracked(),
        language: language.get_untracked().trim().to_string(),
        read_aloud: read_aloud.get_untracked(),
    };

    let on_submit = move |ev: ev::SubmitEvent| {
        ev.prevent_default();
        generate(current_request());
    };

    let explore_suggestion = move |next: String| {
        topic.set(next);
        generate(current_request());
    };

    let view_entry = move |entry: HistoryEntry| {
        error.set(None);
        let request = entry.request();
        topic.set(request.topic.clone());
        age_level.set(request.age_level);
        format.set(request.format);
        language.set(request.language.clone());
        read_aloud.set(request.read_aloud);
        show(
            LearningRequest {
                read_aloud: false,
                ..request
            },
            entry.generation_output(),
        );
    };

    let clear_history = move || {
        history.update(|log| log.clear());
        spawn_local(async move {
            if let Some(store) = store.get_value() {
                if let Err(e) = store.save(&history.get_untracked()).await {
                    log::error!("Failed to clear history: {}", e);
                }
            }
        });
    };

    let select_voice = move |uri: Option<String>| {
        speech.selected_voice.set(uri.clone());
        spawn_local(async move {
            if let Some(store) = store.get_value() {
                if let Err(e) = store.save_selected_voice(uri.as_deref()).await {
                    log::error!("Failed to save voice: {}", e);
                }
            }
        });
    };

    view! {
        <div class="app-container">
            <h1>{APP_TITLE}</h1>
            <form class="learn-form" on:submit=on_submit>
                <label>
                    "Topic"
                    <input
                        type="text"
                        prop:value=move || topic.get()
                        on:input=move |ev| topic.set(event_target_value(&ev))
                    />
                </label>
                <label>
                    {move || format!("Age level: {}", age_level.get())}
                    <input
                        type="range"
                        min=MIN_AGE_LEVEL.to_string()
                        max=MAX_AGE_LEVEL.to_string()
                        prop:value=move || age_level.get().to_string()
                        on:input=move |ev| {
                            if let Ok(v) = event_target_value(&ev).parse::<u8>() {
                                age_level.set(v);
                            }
                        }
                    />
                </label>
                <label>
                    "Style"
                    <select on:change=move |ev| {
                        if let Some(f) = ExplanationFormat::from_name(&event_target_value(&ev)) {
                            format.set(f);
                        }
                    }>
                        {ExplanationFormat::ALL
                            .into_iter()
                            .map(|f| {
                                view! {
                                    <option value=f.as_str() selected=move || format.get() == f>
                                        {f.label()}
                                    </option>
                                }
                            })
                            .collect_view()}
                    </select>
                </label>
                <label>
                    "Language"
                    <input
                        type="text"
                        prop:value=move || language.get()
                        on:input=move |ev| language.set(event_target_value(&ev))
                    />
                </label>
                <label>
                    <input
                        type="checkbox"
                        prop:checked=move || read_aloud.get()
                        on:change=move |ev| read_aloud.set(event_target_checked(&ev))
                    />
                    "Read aloud"
                </label>
                <button type="submit" disabled=move || loading.get()>
                    {move || if loading.get() { "Sparking..." } else { "Spark my curiosity!" }}
                </button>
            </form>

            {move || error.get().map(|e| view! { <p class="error">{e}</p> })}

            {move || {
                output
                    .get()
                    .map(|(request, generated)| {
                        let content = match generated.content {
                            GeneratedContent::Text(text) => {
                                view! {
                                    <TextOutput
                                        text=text
                                        language=request.language.clone()
                                        speech=speech
                                    />
                                }
                                    .into_view()
                            }
                            GeneratedContent::Quiz(_) => view! { <QuizView quiz=quiz/> }.into_view(),
                        };
                        let suggestion = generated
                            .suggested_topic
                            .map(|next| {
                                let label = format!("Explore next: {}", next);
                                view! {
                                    <button
                                        class="suggestion"
                                        on:click=move |_| explore_suggestion(next.clone())
                                    >
                                        {label}
                                    </button>
                                }
                            });
                        view! {
                            <section class="output">
                                <h2>{format!("{} · {}", request.topic, request.format.label())}</h2>
                                {content}
                                {suggestion}
                            </section>
                        }
                    })
            }}

            <HistoryPanel history=history on_view=view_entry on_clear=clear_history/>
            <VoiceSettings speech=speech language=language on_select=select_voice/>
        </div>
    }
}

#[component]
fn TextOutput(text: String, language: String, speech: ReadAloud) -> impl IntoView {
    let paragraphs = text
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|p| view! { <p>{p.to_string()}</p> })
        .collect_view();

    let controls = move || {
        if !speech.is_supported() {
            return view! { <p class="hint">"Read aloud is not available in this browser."</p> }
                .into_view();
        }
        let text = text.clone();
        let language = language.clone();
        match speech.status.get() {
            QueueStatus::Idle => view! {
                <button on:click=move |_| speech.speak(&text, &language)>"🔊 Read aloud"</button>
            }
            .into_view(),
            QueueStatus::Playing => view! {
                <button on:click=move |_| speech.pause()>"⏸ Pause"</button>
                <button on:click=move |_| speech.stop()>"⏹ Stop"</button>
            }
            .into_view(),
            QueueStatus::Paused => view! {
                <button on:click=move |_| speech.resume()>"▶ Resume"</button>
                <button on:click=move |_| speech.stop()>"⏹ Stop"</button>
            }
            .into_view(),
        }
    };

    view! {
        <div class="text-output">
            {paragraphs}
            <div class="speech-controls">{controls}</div>
            {move || speech.error.get().map(|e| view! { <p class="error">{e}</p> })}
        </div>
    }
}

#[component]
fn QuizView(quiz: RwSignal<Option<QuizSession>>) -> impl IntoView {
    let body = move || {
        let Some(session) = quiz.get() else {
            return view! { <p>"No quiz loaded."</p> }.into_view();
        };

        if session.is_finished() {
            return view! {
                <div class="quiz-results">
                    <h3>{format!("You scored {} out of {}!", session.score(), session.len())}</h3>
                    <button on:click=move |_| {
                        quiz.update(|q| {
                            if let Some(q) = q {
                                q.restart();
                            }
                        })
                    }>"Try again"</button>
                </div>
            }
            .into_view();
        }

        let Some(question) = session.current_question().cloned() else {
            return view! { <p>"This quiz has no questions."</p> }.into_view();
        };
        let feedback = session.feedback();
        let revealed = session.is_revealed();
        let selected = session.selected_answer();

        let options = question
            .options
            .iter()
            .enumerate()
            .map(|(i, option)| {
                let class = match (revealed, i == question.correct_answer_index, selected == Some(i)) {
                    (true, true, _) => "option correct",
                    (true, false, true) => "option wrong",
                    _ => "option",
                };
                view! {
                    <button
                        class=class
                        disabled=revealed
                        on:click=move |_| {
                            quiz.update(|q| {
                                if let Some(q) = q {
                                    q.select_answer(i);
                                }
                            })
                        }
                    >
                        {option.clone()}
                    </button>
                }
            })
            .collect_view();

        let next_label = if session.is_last_question() { "See results" } else { "Next question" };
        let feedback_view = feedback.map(|f| {
            view! {
                <div class="feedback">
                    <p>{if f.correct { "✅ Correct!" } else { "❌ Not quite." }}</p>
                    <p>{f.explanation}</p>
                    <button on:click=move |_| {
                        quiz.update(|q| {
                            if let Some(q) = q {
                                q.advance();
                            }
                        })
                    }>{next_label}</button>
                </div>
            }
        });

        view! {
            <div class="quiz-question">
                <p class="progress">
                    {format!("Question {} of {}", session.current_index() + 1, session.len())}
                </p>
                <h3>{question.question.clone()}</h3>
                <div class="options">{options}</div>
                {feedback_view}
            </div>
        }
        .into_view()
    };

    view! { <div class="quiz">{body}</div> }
}

#[component]
fn HistoryPanel<V, C>(history: RwSignal<HistoryLog>, on_view: V, on_clear: C) -> impl IntoView
where
    V: Fn(HistoryEntry) + Copy + 'static,
    C: Fn() + Copy + 'static,
{
    view! {
        <section class="history">
            <h2>"Your explorations"</h2>
            <Show
                when=move || !history.with(|h| h.is_empty())
                fallback=|| view! { <p class="hint">"Nothing here yet. Ask a question!"</p> }
            >
                <ul>
                    <For
                        each=move || history.with(|h| h.entries().to_vec())
                        key=|entry: &HistoryEntry| entry.id.clone()
                        children=move |entry: HistoryEntry| {
                            let label = format!(
                                "{} · {} · age {} · {}",
                                entry.topic,
                                entry.format.short_label(),
                                entry.age_level,
                                entry.created_at()
                            );
                            view! {
                                <li>
                                    <button on:click=move |_| on_view(entry.clone())>{label}</button>
                                </li>
                            }
                        }
                    />
                </ul>
                <button class="danger" on:click=move |_| on_clear()>"Clear history"</button>
            </Show>
        </section>
    }
}

#[component]
fn VoiceSettings<S>(speech: ReadAloud, language: RwSignal<String>, on_select: S) -> impl IntoView
where
    S: Fn(Option<String>) + Copy + 'static,
{
    let test_selected = move |_: ev::MouseEvent| {
        let uri = speech.selected_voice.get_untracked();
        let voices = speech.voices.get_untracked();
        match uri.and_then(|uri| voices.into_iter().find(|v| v.voice_uri == uri)) {
            Some(voice) => speech.test(&voice.voice_uri, &voice.lang),
            // Automatic: let the controller pick for the form's language.
            None => speech.sample(&language.get_untracked()),
        }
    };

    view! {
        <section class="voice-settings">
            <h2>"Voice"</h2>
            <Show
                when=move || speech.is_supported()
                fallback=|| view! { <p class="hint">"Speech is not supported in this browser."</p> }
            >
                <select on:change=move |ev| {
                    let value = event_target_value(&ev);
                    on_select(if value.is_empty() { None } else { Some(value) });
                }>
                    <option value="" selected=move || speech.selected_voice.get().is_none()>
                        "Automatic (match the language)"
                    </option>
                    {move || {
                        speech
                            .voices
                            .get()
                            .into_iter()
                            .map(|v| {
                                let uri = v.voice_uri.clone();
                                let is_selected = move || {
                                    speech.selected_voice.get().as_deref() == Some(uri.as_str())
                                };
                                view! {
                                    <option value=v.voice_uri.clone() selected=is_selected>
                                        {format!("{} ({})", v.name, v.lang)}
                                    </option>
                                }
                            })
                            .collect_view()
                    }}
                </select>
                <button on:click=test_selected>"Test voice"</button>
                {move || speech.sample_error.get().map(|e| view! { <p class="error">{e}</p> })}
            </Show>
        </section>
    }
}
