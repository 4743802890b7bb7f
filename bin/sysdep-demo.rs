fn main() {
    editor_sysdep::demo_main();
}
